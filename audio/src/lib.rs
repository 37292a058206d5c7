//! Audio front end for the bird-song classifier.
//!
//! This crate turns raw 48 kHz mono samples into the features the acoustic
//! model consumes:
//!
//! - [`frame`]: fixed-length overlapping windows with a zero-padded tail
//! - [`kernel`]: real-input radix-2 FFT computed through a half-length
//!   complex transform, behind the [`SpectralKernel`] interface
//! - [`melspec`]: normalisation, mel projection, magnitude compression and
//!   orientation of the spectrogram
//!
//! # Example
//!
//! ```rust
//! use birdnet_audio::{Backend, Framing, MelSpecConfig, SpectralExtractor};
//!
//! let framing = Framing::from_overlap(1.5, 48_000, 144_000);
//! let windows = framing.frame(&vec![0.0f32; 288_000]);
//! assert_eq!(windows.len(), 3);
//!
//! let extractor = SpectralExtractor::new(MelSpecConfig::default(), Backend::Cpu, None).unwrap();
//! let spec = extractor.extract(windows[0].samples()).unwrap();
//! assert_eq!(spec.shape(), [96, 511, 1]);
//! ```

mod error;
pub mod frame;
pub mod kernel;
pub mod melspec;

pub use error::KernelError;
pub use frame::{Framing, Window, round_overlap, MAX_OVERLAP_SECS, SAMPLE_RATE, WINDOW_SIZE};
pub use kernel::{new_kernel, Backend, CpuKernel, FrameBatch, ParallelKernel, SpectralKernel, Spectrum};
pub use melspec::{MelSpecConfig, MelSpectrogram, NormalizeScope, SpectralExtractor};
