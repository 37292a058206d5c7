//! birdnet CLI - identify bird species in audio recordings.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod wav;

use commands::{AnalyzeCommand, SpectrogramCommand};

/// birdnet CLI - identify bird species in audio recordings.
///
/// Reads WAV files of any rate and channel layout, converts them to 48 kHz
/// mono and runs them through the classifier pipeline.
///
/// Configuration is read from ~/.birdnet/config.yaml when present.
#[derive(Parser)]
#[command(name = "birdnet")]
#[command(about = "Bird-song classifier")]
#[command(version)]
pub struct Cli {
    /// Config file (default is ~/.birdnet/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Model root: a directory or an HTTP(S) URL holding birdnet/
    #[arg(short = 'm', long, global = true)]
    pub models: Option<String>,

    /// Output as JSON (for piping)
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify a recording
    Analyze(AnalyzeCommand),
    /// Compute mel spectrograms of a recording
    Spectrogram(SpectrogramCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Analyze(cmd) => cmd.run(&cli).await,
        Commands::Spectrogram(cmd) => cmd.run(&cli).await,
    }
}
