use thiserror::Error;

/// Errors raised while configuring or dispatching spectral kernels.
///
/// Every variant describes a mismatch between the kernel parameters and the
/// data they are applied to. They are configuration errors: the pipeline
/// treats them as fatal at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("frame length {0} is not a power of two >= 2")]
    FrameLength(usize),

    #[error("frame step must be non-zero")]
    ZeroStep,

    #[error("empty batch: {signal} samples hold no frame of {frame_length}")]
    EmptyBatch { signal: usize, frame_length: usize },

    #[error("filterbank shape mismatch: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    Filterbank {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid mel config: {0}")]
    Config(String),

    #[error("thread pool: {0}")]
    ThreadPool(String),
}
