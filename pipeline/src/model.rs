use birdnet_audio::{MelSpectrogram, Window};

use crate::PipelineError;

/// What a [`Scorer`] consumes per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorerInput {
    /// `[mel_bins, frames, 1]` spectrograms from the mel front end.
    Features,
    /// Raw window samples; the model carries its own front end.
    Samples,
}

/// A batch of windows in the form a scorer asked for.
#[derive(Debug, Clone, Copy)]
pub enum ScoreBatch<'a> {
    Features(&'a [MelSpectrogram]),
    Samples(&'a [Window]),
}

impl ScoreBatch<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::Features(f) => f.len(),
            Self::Samples(w) => w.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opaque acoustic classifier.
///
/// Maps every window of a batch to one probability per class, in roster
/// order. Implementations are pure functions of their input.
///
/// # Thread Safety
///
/// Implementations must be safe for concurrent use. The pipeline calls
/// them from blocking worker threads.
pub trait Scorer: Send + Sync {
    /// Input form this model was packaged with.
    fn input(&self) -> ScorerInput;

    /// Length of every output vector.
    fn num_classes(&self) -> usize;

    /// Scores a batch; the result has one row per window, in batch order.
    fn predict(&self, batch: ScoreBatch<'_>) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Opaque location/season model.
///
/// Each query is `[latitude, longitude, week]`; each answer holds one prior
/// per class, in roster order.
pub trait GeoModel: Send + Sync {
    fn num_classes(&self) -> usize;

    fn predict(&self, queries: &[[f32; 3]]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Checks a batched model output against the expected row count and width.
pub(crate) fn check_rows(rows: &[Vec<f32>], count: usize, width: usize) -> Result<(), PipelineError> {
    if rows.len() != count {
        return Err(PipelineError::DimensionMismatch {
            expected: count,
            got: rows.len(),
        });
    }
    match rows.iter().find(|r| r.len() != width) {
        Some(row) => Err(PipelineError::DimensionMismatch {
            expected: width,
            got: row.len(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_rows_reports_first_mismatch() {
        let rows = vec![vec![0.0; 3], vec![0.0; 2]];
        assert!(matches!(
            check_rows(&rows, 2, 3),
            Err(PipelineError::DimensionMismatch { expected: 3, got: 2 })
        ));
        assert!(matches!(
            check_rows(&rows, 3, 3),
            Err(PipelineError::DimensionMismatch { expected: 3, got: 2 })
        ));
        assert!(check_rows(&rows[..1], 1, 3).is_ok());
    }
}
