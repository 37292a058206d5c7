//! Spectral kernels: batched short-time real FFT.
//!
//! [`SpectralKernel`] is the single capability the mel front end needs: turn
//! a batch of real frames into a batch of one-sided spectra. Two
//! implementations share the same [`plan`] tables:
//!
//! - [`CpuKernel`]: portable, one frame after another on the calling thread
//! - [`ParallelKernel`]: frames dispatched across a rayon thread pool, one
//!   work item per frame, the way a GPU backend maps frames to invocations
//!
//! The backend is picked once at startup with [`new_kernel`].

mod cpu;
mod parallel;
mod plan;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::KernelError;

pub use cpu::CpuKernel;
pub use parallel::ParallelKernel;

/// Batched real FFT over strided frames.
///
/// # Thread Safety
///
/// Implementations must be safe for concurrent use; a kernel is built once
/// and shared by every prediction of a pipeline.
pub trait SpectralKernel: Send + Sync {
    /// Frame length this kernel was planned for.
    fn frame_length(&self) -> usize;

    /// Number of one-sided bins per frame, `frame_length / 2 + 1`.
    fn bins(&self) -> usize {
        self.frame_length() / 2 + 1
    }

    /// Computes the one-sided spectrum of every frame in `batch`.
    fn transform(&self, batch: &FrameBatch<'_>) -> Result<Spectrum, KernelError>;
}

/// Selects the kernel implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Sequential portable kernel.
    #[default]
    Cpu,
    /// Data-parallel kernel on a dedicated thread pool.
    Parallel,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "parallel" => Ok(Self::Parallel),
            other => Err(format!("unknown kernel backend {other:?}, expected cpu or parallel")),
        }
    }
}

/// Builds a kernel for `frame_length` on the selected backend.
///
/// `threads` only applies to [`Backend::Parallel`]; `None` sizes the pool
/// from the available parallelism.
pub fn new_kernel(
    backend: Backend,
    frame_length: usize,
    threads: Option<usize>,
) -> Result<Arc<dyn SpectralKernel>, KernelError> {
    match backend {
        Backend::Cpu => Ok(Arc::new(CpuKernel::new(frame_length)?)),
        Backend::Parallel => Ok(Arc::new(ParallelKernel::new(frame_length, threads)?)),
    }
}

/// A batch of frames read from one signal with a fixed stride.
///
/// Frame `b` covers `signal[b * frame_step .. b * frame_step + frame_length]`.
/// Frames are views; nothing is copied until a kernel packs them.
#[derive(Debug, Clone, Copy)]
pub struct FrameBatch<'a> {
    signal: &'a [f32],
    frame_length: usize,
    frame_step: usize,
    batch: usize,
}

impl<'a> FrameBatch<'a> {
    /// Describes the frames of `signal`.
    ///
    /// The batch size is `(len - frame_length + frame_step) / frame_step`;
    /// a signal shorter than one frame is an error, as is a zero step.
    pub fn new(signal: &'a [f32], frame_length: usize, frame_step: usize) -> Result<Self, KernelError> {
        if frame_step == 0 {
            return Err(KernelError::ZeroStep);
        }
        if frame_length == 0 || signal.len() < frame_length {
            return Err(KernelError::EmptyBatch {
                signal: signal.len(),
                frame_length,
            });
        }
        let batch = (signal.len() - frame_length + frame_step) / frame_step;
        Ok(Self {
            signal,
            frame_length,
            frame_step,
            batch,
        })
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.batch
    }

    pub fn is_empty(&self) -> bool {
        self.batch == 0
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    pub fn frame_step(&self) -> usize {
        self.frame_step
    }

    /// Samples of frame `b`.
    pub fn frame(&self, b: usize) -> &'a [f32] {
        let start = b * self.frame_step;
        &self.signal[start..start + self.frame_length]
    }
}

/// One-sided spectra for a batch, row-major `[batch, bins]`.
///
/// `re` is the real part of the real FFT, the channel the mel projection
/// consumes. `im` completes the complex bins for magnitude-based consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    batch: usize,
    bins: usize,
    re: Vec<f32>,
    im: Vec<f32>,
}

impl Spectrum {
    pub(crate) fn zeros(batch: usize, bins: usize) -> Self {
        Self {
            batch,
            bins,
            re: vec![0.0; batch * bins],
            im: vec![0.0; batch * bins],
        }
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Real parts of frame `b`.
    pub fn real(&self, b: usize) -> &[f32] {
        &self.re[b * self.bins..(b + 1) * self.bins]
    }

    /// Imaginary parts of frame `b`.
    pub fn imag(&self, b: usize) -> &[f32] {
        &self.im[b * self.bins..(b + 1) * self.bins]
    }

    /// Magnitudes `|X[k]|` of frame `b`.
    pub fn magnitude(&self, b: usize) -> Vec<f32> {
        self.real(b)
            .iter()
            .zip(self.imag(b))
            .map(|(r, i)| (r * r + i * i).sqrt())
            .collect()
    }

    pub(crate) fn rows_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.re, &mut self.im)
    }
}
