//! Temporal pooling of per-window class scores.

use std::sync::Arc;

use serde::Serialize;

use crate::geo::GeoPrior;
use crate::roster::Roster;
use crate::PipelineError;

/// One row of a pooled result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassScore {
    pub index: usize,
    pub name: String,
    pub name_i18n: String,
    /// Mean acoustic confidence over the clip's windows.
    pub confidence: f32,
    /// Location/season prior; carried next to `confidence`, never multiplied
    /// into it.
    pub geoscore: f32,
}

/// Pooled scores of one clip combined with one prior snapshot.
///
/// A result is never mutated; a later prediction or prior refresh produces
/// a new one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PooledResult {
    /// Version of the [`GeoPrior`] the geoscores were taken from.
    pub prior_version: u64,
    pub pooled: Vec<ClassScore>,
}

impl PooledResult {
    /// Pairs pooled means with roster names and the prior, by class index.
    pub fn assemble(means: &[f32], roster: &Roster, prior: &GeoPrior) -> Result<Self, PipelineError> {
        for len in [roster.len(), prior.len()] {
            if len != means.len() {
                return Err(PipelineError::DimensionMismatch {
                    expected: means.len(),
                    got: len,
                });
            }
        }
        let pooled = roster
            .iter()
            .zip(means)
            .zip(prior.scores())
            .enumerate()
            .map(|(index, ((species, &confidence), &geoscore))| ClassScore {
                index,
                name: species.name.clone(),
                name_i18n: species.name_i18n.clone(),
                confidence,
                geoscore,
            })
            .collect();
        Ok(Self {
            prior_version: prior.version(),
            pooled,
        })
    }

    pub fn len(&self) -> usize {
        self.pooled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pooled.is_empty()
    }

    /// The `n` most confident classes, best first. Ties keep class order.
    pub fn top(&self, n: usize) -> Vec<&ClassScore> {
        let mut ranked: Vec<&ClassScore> = self.pooled.iter().collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        ranked.truncate(n);
        ranked
    }
}

/// A ranked class in a per-window summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedClass {
    pub index: usize,
    pub name: String,
    pub confidence: f32,
}

/// Diagnostics for one window. Does not feed into the pooled result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub window: usize,
    pub max: f32,
    pub mean: f32,
    pub top: Vec<RankedClass>,
}

/// Averages per-window class vectors of one clip.
#[derive(Debug, Clone)]
pub struct TemporalPooler {
    num_classes: usize,
    top_n: usize,
}

impl TemporalPooler {
    pub fn new(num_classes: usize, top_n: usize) -> Self {
        Self { num_classes, top_n }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn check(&self, scores: &[Vec<f32>]) -> Result<(), PipelineError> {
        if scores.is_empty() {
            return Err(PipelineError::EmptyInput("no window scores to pool"));
        }
        match scores.iter().find(|row| row.len() != self.num_classes) {
            Some(row) => Err(PipelineError::DimensionMismatch {
                expected: self.num_classes,
                got: row.len(),
            }),
            None => Ok(()),
        }
    }

    /// `pooled[c] = Σ_f scores[f][c] / windows`, accumulated in f64.
    pub fn pool(&self, scores: &[Vec<f32>]) -> Result<Arc<[f32]>, PipelineError> {
        self.check(scores)?;
        let mut sums = vec![0.0f64; self.num_classes];
        for row in scores {
            for (s, &v) in sums.iter_mut().zip(row) {
                *s += v as f64;
            }
        }
        let n = scores.len() as f64;
        Ok(sums.into_iter().map(|s| (s / n) as f32).collect())
    }

    /// Per-window max, mean and top classes.
    pub fn summarize(&self, scores: &[Vec<f32>], roster: &Roster) -> Result<Vec<WindowSummary>, PipelineError> {
        self.check(scores)?;
        Ok(scores
            .iter()
            .enumerate()
            .map(|(window, row)| {
                let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mean = (row.iter().map(|&v| v as f64).sum::<f64>() / row.len().max(1) as f64) as f32;
                let mut order: Vec<usize> = (0..row.len()).collect();
                order.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
                let top = order
                    .into_iter()
                    .take(self.top_n)
                    .map(|index| RankedClass {
                        index,
                        name: roster.display_name(index).to_string(),
                        confidence: row[index],
                    })
                    .collect();
                WindowSummary {
                    window,
                    max,
                    mean,
                    top,
                }
            })
            .collect())
    }
}
