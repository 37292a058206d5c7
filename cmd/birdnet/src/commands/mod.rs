//! CLI commands module.

mod analyze;
mod spectrogram;

pub use analyze::AnalyzeCommand;
pub use spectrogram::SpectrogramCommand;

use std::path::Path;

use anyhow::Context;
use birdnet_pipeline::PipelineConfig;

use crate::Cli;

/// Loads the config file named on the command line, or the default one,
/// with `--models` applied on top.
pub(crate) fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => PipelineConfig::load(Path::new(path)).with_context(|| format!("load config {path}"))?,
        None => PipelineConfig::load_default().context("load default config")?,
    };
    if let Some(models) = &cli.models {
        cfg.model_root = Some(models.clone());
    }
    Ok(cfg)
}

/// Prints a value as pretty JSON to stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
