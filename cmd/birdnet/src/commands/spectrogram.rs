//! Mel spectrogram inspection.

use std::path::PathBuf;

use anyhow::Context;
use birdnet_audio::{Backend, Framing, MelSpecConfig, MelSpectrogram, SpectralExtractor};
use clap::Args;
use serde::Serialize;

use super::{load_config, print_json};
use crate::{wav, Cli};

/// Compute mel spectrograms of a recording.
///
/// Frames the clip like `analyze` does and prints per-window statistics of
/// the resulting spectrograms. With --dump the full matrices are written
/// as JSON.
#[derive(Args)]
pub struct SpectrogramCommand {
    /// WAV file to process
    input: PathBuf,

    /// Mel layer config (melspec.json); built-in defaults when omitted
    #[arg(long)]
    melspec: Option<PathBuf>,

    /// Window overlap in seconds
    #[arg(long)]
    overlap: Option<f32>,

    /// Spectral kernel backend: cpu or parallel
    #[arg(long)]
    backend: Option<Backend>,

    /// Write every spectrogram as `[mel][frame]` rows to this file
    #[arg(long)]
    dump: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WindowStats {
    window: usize,
    start_sec: f32,
    shape: [usize; 3],
    min: f32,
    max: f32,
    mean: f32,
}

impl WindowStats {
    fn new(window: usize, start_sec: f32, spec: &MelSpectrogram) -> Self {
        let data = spec.as_slice();
        let min = data.iter().copied().fold(f32::INFINITY, f32::min);
        let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean = (data.iter().map(|&v| v as f64).sum::<f64>() / data.len().max(1) as f64) as f32;
        Self {
            window,
            start_sec,
            shape: spec.shape(),
            min,
            max,
            mean,
        }
    }
}

fn rows(spec: &MelSpectrogram) -> Vec<&[f32]> {
    spec.as_slice().chunks(spec.frames().max(1)).collect()
}

impl SpectrogramCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let cfg = load_config(cli)?;
        let mel: MelSpecConfig = match &self.melspec {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
                serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?
            }
            None => MelSpecConfig::default(),
        };
        let mel = MelSpecConfig {
            normalize: cfg.normalize.unwrap_or(mel.normalize),
            ..mel
        };

        let extractor = SpectralExtractor::new(mel, self.backend.unwrap_or(cfg.backend), cfg.kernel_threads)?;
        extractor.validate_window(cfg.window_size)?;

        let pcm = wav::read_mono(&self.input, cfg.sample_rate as u32)
            .with_context(|| format!("read {}", self.input.display()))?;
        let overlap = cfg.effective_overlap(self.overlap);
        let framing = Framing::from_overlap(overlap, cfg.sample_rate, cfg.window_size);
        let windows = framing.frame(&pcm);
        tracing::debug!(samples = pcm.len(), windows = windows.len(), overlap, "framed");

        let specs = tokio::task::spawn_blocking(move || extractor.extract_batch(&windows)).await??;
        let stats: Vec<WindowStats> = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| WindowStats::new(i, (i * framing.hop) as f32 / cfg.sample_rate as f32, spec))
            .collect();

        if let Some(path) = &self.dump {
            let matrices: Vec<Vec<&[f32]>> = specs.iter().map(rows).collect();
            let json = serde_json::to_vec(&matrices)?;
            std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
            tracing::info!(path = %path.display(), windows = specs.len(), "spectrograms written");
        }

        if cli.json {
            return print_json(&stats);
        }
        println!("{:>6}  {:>8}  {:>14}  {:>9}  {:>9}  {:>9}", "WINDOW", "START", "SHAPE", "MIN", "MAX", "MEAN");
        for s in &stats {
            let shape = format!("{}x{}x{}", s.shape[0], s.shape[1], s.shape[2]);
            println!(
                "{:>6}  {:>7.1}s  {:>14}  {:>9.4}  {:>9.4}  {:>9.4}",
                s.window, s.start_sec, shape, s.min, s.max, s.mean
            );
        }
        Ok(())
    }
}
