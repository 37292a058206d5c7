//! Recording classification.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use birdnet_audio::Backend;
use birdnet_pipeline::{
    AssetLoader, AssetSource, ClassScore, Event, Pipeline, PooledResult, ScorerInput,
};
use clap::Args;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{load_config, print_json};
use crate::{wav, Cli};

/// Classify a recording.
///
/// Pools per-window scores over the whole clip and prints the most
/// confident species. With --lat/--lon the location/season prior for the
/// current week is shown next to each confidence.
#[derive(Args)]
pub struct AnalyzeCommand {
    /// WAV file to analyze
    input: PathBuf,

    /// Window overlap in seconds (rounded to 0.5 s, at most 2.5 s)
    #[arg(long)]
    overlap: Option<f32>,

    /// Latitude of the recording site
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f32>,

    /// Longitude of the recording site
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f32>,

    /// Number of species to print
    #[arg(short = 'n', long, default_value_t = 10)]
    top: usize,

    /// Label language (e.g. de, pt-BR)
    #[arg(short = 'l', long)]
    language: Option<String>,

    /// Spectral kernel backend: cpu or parallel
    #[arg(long)]
    backend: Option<Backend>,

    /// Feed the scorer mel spectrograms (default when the model root has melspec.json)
    #[arg(long, conflicts_with = "samples")]
    features: bool,

    /// Feed the scorer raw samples (default when the model root has no melspec.json)
    #[arg(long)]
    samples: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    file: String,
    seconds: f32,
    prior_version: u64,
    top: Vec<&'a ClassScore>,
}

impl AnalyzeCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let mut cfg = load_config(cli)?;
        if self.language.is_some() {
            cfg.language = self.language.clone();
        }
        if let Some(backend) = self.backend {
            cfg.backend = backend;
        }
        let root = cfg
            .model_root
            .clone()
            .context("no model root: pass --models or set model_root in the config file")?;
        let sample_rate = cfg.sample_rate;

        let loader = AssetLoader::new(AssetSource::parse(&root)?);
        let loader = if self.features {
            loader.with_scorer_input(ScorerInput::Features)
        } else if self.samples {
            loader.with_scorer_input(ScorerInput::Samples)
        } else {
            loader.with_detected_input().await?
        };
        let (pipeline, mut events) = Pipeline::spawn(cfg, Arc::new(loader));

        let logger = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    Event::Progress { phase, percent } => debug!(?phase, percent, "loading"),
                    Event::Loaded {
                        classes,
                        language,
                        geo_model,
                    } => info!(classes, language, geo_model, "models loaded"),
                    Event::PredictDebug { windows } => {
                        for w in windows {
                            let best = w.top.first().map(|t| t.name.as_str()).unwrap_or("");
                            debug!(window = w.window, max = w.max, mean = w.mean, best, "window");
                        }
                    }
                    Event::AreaScores { week, prior_version } => debug!(week, prior_version, "prior updated"),
                    Event::Error { error } => warn!(%error, "pipeline error"),
                    Event::Pooled(_) => {}
                }
            }
        });

        let pcm = wav::read_mono(&self.input, sample_rate as u32)
            .with_context(|| format!("read {}", self.input.display()))?;
        let seconds = pcm.len() as f32 / sample_rate as f32;
        pipeline.wait_ready().await?;

        let mut result = pipeline.predict(pcm, self.overlap).await?;
        if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
            match pipeline.area_scores(lat, lon).await? {
                Some(ack) => {
                    if let Some(pooled) = ack.pooled {
                        result = pooled;
                    }
                }
                None => warn!("no geo model available, location ignored"),
            }
        }

        pipeline.shutdown();
        drop(pipeline);
        let _ = logger.await;

        if cli.json {
            print_json(&Report {
                file: self.input.display().to_string(),
                seconds,
                prior_version: result.prior_version,
                top: result.top(self.top),
            })
        } else {
            print_table(&result, self.top, self.lat.is_some());
            Ok(())
        }
    }
}

fn print_table(result: &PooledResult, top: usize, with_prior: bool) {
    if with_prior {
        println!("{:>10}  {:>8}  SPECIES", "CONFIDENCE", "GEOSCORE");
    } else {
        println!("{:>10}  SPECIES", "CONFIDENCE");
    }
    for class in result.top(top) {
        if with_prior {
            println!("{:>10.4}  {:>8.3}  {}", class.confidence, class.geoscore, class.name_i18n);
        } else {
            println!("{:>10.4}  {}", class.confidence, class.name_i18n);
        }
    }
}
