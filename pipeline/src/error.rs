use birdnet_audio::KernelError;
use thiserror::Error;

/// Errors returned by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("spectral kernel: {0}")]
    Kernel(#[from] KernelError),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("asset {path}: {reason}")]
    Asset { path: String, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("worker: {0}")]
    Worker(String),

    #[error("pipeline failed to load: {0}")]
    LoadFailed(String),

    #[error("pipeline is closed")]
    Closed,
}

impl PipelineError {
    pub(crate) fn asset(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Asset {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
