//! Messages between a [`crate::Pipeline`] and its host.
//!
//! Requests go in through typed calls that each resolve to one terminal
//! result. Everything else the pipeline has to say (load progress,
//! per-window diagnostics, re-emitted results) arrives on the [`Event`]
//! stream, in the order it happened.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::pool::{PooledResult, WindowSummary};
use crate::PipelineError;

/// Load phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Scorer weights, 0 to 70 %.
    LoadModel,
    /// One all-zero window through the scorer, 70 %.
    Warmup,
    /// Geo model, 90 %.
    LoadGeomodel,
    /// Label roster, 95 %.
    LoadLabels,
}

impl Phase {
    /// Percentage reported when the phase starts.
    pub fn start_percent(self) -> u8 {
        match self {
            Self::LoadModel => 0,
            Self::Warmup => 70,
            Self::LoadGeomodel => 90,
            Self::LoadLabels => 95,
        }
    }
}

/// Lifecycle of a pipeline.
///
/// `Uninitialized → LoadingScorer → LoadingGeoModel → LoadingRoster → Ready`,
/// then `Predicting` / `FusingGeo` while work is running. A load error ends
/// in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    Uninitialized,
    LoadingScorer,
    LoadingGeoModel,
    LoadingRoster,
    Ready,
    Predicting,
    FusingGeo,
    Failed,
}

impl State {
    /// True once loading has finished successfully.
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Ready | Self::Predicting | Self::FusingGeo)
    }
}

/// Out-of-band notifications.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "message", rename_all = "kebab-case")]
pub enum Event {
    /// Load progress; `percent` never decreases.
    Progress { phase: Phase, percent: u8 },
    /// Loading finished; the pipeline is `Ready`.
    Loaded {
        classes: usize,
        language: &'static str,
        #[serde(rename = "geoModel")]
        geo_model: bool,
    },
    /// Per-window diagnostics of a prediction, before its pooled result.
    PredictDebug { windows: Vec<WindowSummary> },
    /// A pooled result, from a prediction or a prior refresh.
    Pooled(PooledResult),
    /// The prior was refreshed.
    AreaScores {
        week: i32,
        #[serde(rename = "priorVersion")]
        prior_version: u64,
    },
    /// A load or request failure.
    Error { error: String },
}

/// Reply to an area-scores request on a pipeline with a geo model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaScores {
    pub week: i32,
    pub prior_version: u64,
    /// The last prediction re-pooled against the new prior, if there was one.
    pub pooled: Option<PooledResult>,
}

pub(crate) struct PredictRequest {
    pub pcm: Vec<f32>,
    pub overlap: Option<f32>,
    pub reply: oneshot::Sender<Result<PooledResult, PipelineError>>,
}

pub(crate) struct GeoRequest {
    pub latitude: f32,
    pub longitude: f32,
    pub at: DateTime<FixedOffset>,
    pub reply: oneshot::Sender<Result<Option<AreaScores>, PipelineError>>,
}
