//! Mel spectrogram front end of the acoustic model.
//!
//! Turns one 3 s window into the `[mel_bins, frames, 1]` tensor the scorer
//! consumes:
//!
//! 1. min/max normalisation to `[-1, 1]`
//! 2. short-time real FFT through a [`SpectralKernel`]
//! 3. projection of the real spectrum onto the mel filterbank, squared
//! 4. compression by `x^(1 / (1 + e^s))`, `s` being the trained
//!    `magnitude_scaling`
//! 5. mel axis reversed, transposed to `[mel, frame]`, singleton channel
//!
//! The filterbank and `s` come from the trained model's layer config
//! ([`MelSpecConfig`]). When a config only carries `fmin`/`fmax`, an HTK
//! filterbank is generated with [`filterbank::linear_to_mel_weight_matrix`].

pub mod filterbank;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::frame::Window;
use crate::kernel::{new_kernel, Backend, FrameBatch, SpectralKernel};

/// Added to the normalisation divisor so a silent window stays finite.
const NORM_EPSILON: f32 = 1e-6;

/// Range over which min/max normalisation is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeScope {
    /// One min/max over the whole window. This is what the trained model
    /// was fitted with.
    #[default]
    Window,
    /// Independent min/max per inner frame.
    Frame,
}

/// Parameters of the mel layer, in the shape of the model's layer config.
///
/// ```json
/// {
///   "sampleRate": 48000,
///   "specShape": [96, 511],
///   "frameStep": 278,
///   "frameLength": 2048,
///   "fmin": 0,
///   "fmax": 3000,
///   "magnitudeScaling": 1.23
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MelSpecConfig {
    pub sample_rate: usize,
    /// `[mel_bins, frames]`. A zero frame count disables the window length
    /// check in [`SpectralExtractor::validate_window`].
    pub spec_shape: [usize; 2],
    pub frame_step: usize,
    /// Must be a power of two.
    pub frame_length: usize,
    /// Trained `[frame_length / 2 + 1][mel_bins]` projection. Generated from
    /// `fmin`/`fmax` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mel_filterbank: Option<Vec<Vec<f32>>>,
    pub fmin: f32,
    pub fmax: f32,
    #[serde(alias = "magScale")]
    pub magnitude_scaling: f32,
    pub normalize: NormalizeScope,
}

impl Default for MelSpecConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            spec_shape: [96, 511],
            frame_step: 278,
            frame_length: 2048,
            mel_filterbank: None,
            fmin: 0.0,
            fmax: 3000.0,
            magnitude_scaling: 1.23,
            normalize: NormalizeScope::Window,
        }
    }
}

impl MelSpecConfig {
    pub fn mel_bins(&self) -> usize {
        self.spec_shape[0]
    }

    /// Exponent applied to mel power, `1 / (1 + e^s)`.
    pub fn compression_exponent(&self) -> f32 {
        1.0 / (1.0 + self.magnitude_scaling.exp())
    }

    /// Returns the filterbank as a row-major `[bins * mel_bins]` matrix,
    /// validating a trained one or generating it from `fmin`/`fmax`.
    fn resolve_filterbank(&self) -> Result<Vec<f32>, KernelError> {
        let bins = self.frame_length / 2 + 1;
        let mel_bins = self.mel_bins();
        if mel_bins == 0 {
            return Err(KernelError::Config("specShape has zero mel bins".into()));
        }

        match &self.mel_filterbank {
            Some(rows) => {
                let cols = rows.first().map_or(0, Vec::len);
                if rows.len() != bins || cols != mel_bins || rows.iter().any(|r| r.len() != cols) {
                    return Err(KernelError::Filterbank {
                        expected_rows: bins,
                        expected_cols: mel_bins,
                        rows: rows.len(),
                        cols,
                    });
                }
                Ok(rows.iter().flatten().copied().collect())
            }
            None => {
                let nyquist = self.sample_rate as f32 / 2.0;
                if !(self.fmin >= 0.0 && self.fmin < self.fmax && self.fmax <= nyquist) {
                    return Err(KernelError::Config(format!(
                        "need 0 <= fmin < fmax <= {nyquist}, got fmin={} fmax={}",
                        self.fmin, self.fmax
                    )));
                }
                let rows = filterbank::linear_to_mel_weight_matrix(
                    mel_bins,
                    bins,
                    self.sample_rate as f64,
                    self.fmin as f64,
                    self.fmax as f64,
                );
                Ok(rows.into_iter().flatten().collect())
            }
        }
    }
}

/// Compressed mel spectrogram of one window, laid out `[mel_bins, frames, 1]`
/// row-major. Row 0 is the highest mel band.
#[derive(Debug, Clone, PartialEq)]
pub struct MelSpectrogram {
    mel_bins: usize,
    frames: usize,
    data: Vec<f32>,
}

impl MelSpectrogram {
    pub fn shape(&self) -> [usize; 3] {
        [self.mel_bins, self.frames, 1]
    }

    pub fn mel_bins(&self) -> usize {
        self.mel_bins
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Value at output row `mel` and inner frame `frame`.
    pub fn get(&self, mel: usize, frame: usize) -> f32 {
        self.data[mel * self.frames + frame]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Computes mel spectrograms with a fixed kernel and filterbank.
///
/// All parameter checks happen in [`SpectralExtractor::new`]; a constructed
/// extractor only fails on windows of the wrong length.
pub struct SpectralExtractor {
    cfg: MelSpecConfig,
    kernel: Arc<dyn SpectralKernel>,
    filterbank: Vec<f32>,
    exponent: f32,
}

impl std::fmt::Debug for SpectralExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralExtractor")
            .field("cfg", &self.cfg)
            .field("exponent", &self.exponent)
            .finish_non_exhaustive()
    }
}

impl SpectralExtractor {
    /// Builds an extractor on a fresh kernel of the given backend.
    pub fn new(cfg: MelSpecConfig, backend: Backend, threads: Option<usize>) -> Result<Self, KernelError> {
        let kernel = new_kernel(backend, cfg.frame_length, threads)?;
        Self::with_kernel(cfg, kernel)
    }

    /// Builds an extractor on an existing kernel.
    pub fn with_kernel(cfg: MelSpecConfig, kernel: Arc<dyn SpectralKernel>) -> Result<Self, KernelError> {
        if kernel.frame_length() != cfg.frame_length {
            return Err(KernelError::DimensionMismatch {
                expected: cfg.frame_length,
                got: kernel.frame_length(),
            });
        }
        if cfg.frame_step == 0 {
            return Err(KernelError::ZeroStep);
        }
        let filterbank = cfg.resolve_filterbank()?;
        let exponent = cfg.compression_exponent();
        tracing::debug!(
            frame_length = cfg.frame_length,
            frame_step = cfg.frame_step,
            mel_bins = cfg.mel_bins(),
            exponent,
            trained_filterbank = cfg.mel_filterbank.is_some(),
            "mel extractor ready"
        );
        Ok(Self {
            cfg,
            kernel,
            filterbank,
            exponent,
        })
    }

    pub fn config(&self) -> &MelSpecConfig {
        &self.cfg
    }

    /// Checks that windows of `window_size` samples hold at least one inner
    /// frame and produce the frame count in `specShape`. Returns that count.
    pub fn validate_window(&self, window_size: usize) -> Result<usize, KernelError> {
        let (length, step) = (self.cfg.frame_length, self.cfg.frame_step);
        if window_size < length {
            return Err(KernelError::EmptyBatch {
                signal: window_size,
                frame_length: length,
            });
        }
        let frames = (window_size - length + step) / step;
        let expected = self.cfg.spec_shape[1];
        if expected != 0 && frames != expected {
            return Err(KernelError::DimensionMismatch { expected, got: frames });
        }
        Ok(frames)
    }

    /// Computes the spectrogram of one window.
    pub fn extract(&self, window: &[f32]) -> Result<MelSpectrogram, KernelError> {
        let frames = self.validate_window(window.len())?;
        let (length, step) = (self.cfg.frame_length, self.cfg.frame_step);

        let spectrum = match self.cfg.normalize {
            NormalizeScope::Window => {
                let mut signal = window.to_vec();
                normalize(&mut signal);
                self.kernel.transform(&FrameBatch::new(&signal, length, step)?)?
            }
            NormalizeScope::Frame => {
                // Frames overlap, so each one gets its own normalised copy.
                let mut signal = Vec::with_capacity(frames * length);
                for f in 0..frames {
                    let start = signal.len();
                    signal.extend_from_slice(&window[f * step..f * step + length]);
                    normalize(&mut signal[start..]);
                }
                self.kernel.transform(&FrameBatch::new(&signal, length, length)?)?
            }
        };

        let mel_bins = self.cfg.mel_bins();
        let mut data = vec![0.0f32; mel_bins * frames];
        let mut acc = vec![0.0f32; mel_bins];
        for f in 0..spectrum.batch() {
            acc.fill(0.0);
            for (k, &x) in spectrum.real(f).iter().enumerate() {
                if x == 0.0 {
                    continue;
                }
                let row = &self.filterbank[k * mel_bins..(k + 1) * mel_bins];
                for (a, &w) in acc.iter_mut().zip(row) {
                    *a += x * w;
                }
            }
            for (m, &a) in acc.iter().enumerate() {
                data[(mel_bins - 1 - m) * frames + f] = (a * a).powf(self.exponent);
            }
        }

        Ok(MelSpectrogram {
            mel_bins,
            frames,
            data,
        })
    }

    /// Computes the spectrograms of a window sequence, preserving order.
    pub fn extract_batch(&self, windows: &[Window]) -> Result<Vec<MelSpectrogram>, KernelError> {
        windows.iter().map(|w| self.extract(w.samples())).collect()
    }
}

/// Rescales `x` in place to `[-1, 1]` via `(x - min) / (max(x - min) + eps)`.
fn normalize(x: &mut [f32]) {
    let min = x.iter().copied().fold(f32::INFINITY, f32::min);
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !min.is_finite() {
        return;
    }
    let scale = 1.0 / (max - min + NORM_EPSILON);
    for v in x.iter_mut() {
        *v = ((*v - min) * scale - 0.5) * 2.0;
    }
}
