//! Bird-song classification pipeline.
//!
//! A [`Pipeline`] loads an acoustic [`Scorer`], an optional [`GeoModel`]
//! and the species [`Roster`], then turns clips of 48 kHz mono audio into
//! pooled per-species confidences paired with a location/season prior.
//!
//! ```text
//! pcm ─► Framing ─► SpectralExtractor ─► Scorer ─► TemporalPooler ─┐
//!                  (feature scorers only)                           ├─► PooledResult
//! (lat, lon, week) ─────────────────────► GeoModel ─► GeoPrior ─────┘
//! ```
//!
//! Requests are typed calls on the handle; progress, per-window
//! diagnostics and re-emitted results arrive on the [`Event`] stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use birdnet_pipeline::{AssetLoader, AssetSource, Pipeline, PipelineConfig};
//!
//! let loader = AssetLoader::new(AssetSource::parse("./models")?);
//! let (pipeline, mut events) = Pipeline::spawn(PipelineConfig::default(), Arc::new(loader));
//! pipeline.wait_ready().await?;
//!
//! let result = pipeline.predict(pcm, Some(1.5)).await?;
//! for class in result.top(5) {
//!     println!("{} {:.3} (geo {:.2})", class.name_i18n, class.confidence, class.geoscore);
//! }
//! ```
//!
//! # Features
//!
//! - `ort`: ONNX Runtime backed [`Scorer`] and [`GeoModel`]. Without it,
//!   models have to be supplied through a custom [`ModelLoader`].

mod error;
pub mod assets;
pub mod config;
pub mod geo;
pub mod model;
#[cfg(feature = "ort")]
pub mod model_ort;
pub mod pool;
pub mod protocol;
pub mod roster;
mod worker;

pub use error::PipelineError;
pub use assets::{AssetLoader, AssetSource, ModelLoader, Progress};
pub use config::PipelineConfig;
pub use geo::{week_of_year, GeoFuser, GeoPrior, GeoUpdate};
pub use model::{GeoModel, ScoreBatch, Scorer, ScorerInput};
#[cfg(feature = "ort")]
pub use model_ort::{OrtGeoModel, OrtScorer, OrtScorerConfig};
pub use pool::{ClassScore, PooledResult, RankedClass, TemporalPooler, WindowSummary};
pub use protocol::{AreaScores, Event, Phase, State};
pub use roster::{resolve_language, Roster, Species, DEFAULT_LANGUAGE, SUPPORTED_LANGUAGES};
pub use worker::Pipeline;
