//! Pipeline configuration.
//!
//! Stored as YAML in `~/.birdnet/config.yaml`:
//!
//! ```yaml
//! model_root: https://example.org/models
//! language: de
//! default_overlap: 1.5
//! top_n: 10
//! backend: parallel
//! kernel_threads: 4
//! ```

use std::path::{Path, PathBuf};

use birdnet_audio::{Backend, NormalizeScope, MAX_OVERLAP_SECS, SAMPLE_RATE, WINDOW_SIZE};
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Default base configuration directory name.
pub const DEFAULT_BASE_DIR: &str = ".birdnet";
/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory or HTTP(S) base URL holding the `birdnet/` asset tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_root: Option<String>,

    /// Label language or locale tag; resolved against the supported list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    pub sample_rate: usize,
    pub window_size: usize,

    /// Overlap used when a request does not give one, in seconds.
    pub default_overlap: f32,
    /// Upper bound on the requested overlap, at most 2.5 s.
    pub max_overlap: f32,

    /// Classes listed per window in the debug summary.
    pub top_n: usize,

    pub backend: Backend,
    /// Worker threads for the parallel kernel; all cores when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_threads: Option<usize>,

    /// Overrides the normalisation scope of the mel layer config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalize: Option<NormalizeScope>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_root: None,
            language: None,
            sample_rate: SAMPLE_RATE,
            window_size: WINDOW_SIZE,
            default_overlap: 1.5,
            max_overlap: MAX_OVERLAP_SECS,
            top_n: 10,
            backend: Backend::Cpu,
            kernel_threads: None,
            normalize: None,
        }
    }
}

impl PipelineConfig {
    /// Gets the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR).join(DEFAULT_CONFIG_FILE))
    }

    /// Loads and validates a YAML config file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_yaml(&content)
    }

    /// Loads the default config file, or the defaults when it does not exist.
    pub fn load_default() -> Result<Self, PipelineError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, PipelineError> {
        let cfg: Self = serde_yaml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.sample_rate == 0 || self.window_size == 0 {
            return Err(PipelineError::Config("sample_rate and window_size must be non-zero".into()));
        }
        if !(0.0..=MAX_OVERLAP_SECS).contains(&self.max_overlap) {
            return Err(PipelineError::Config(format!(
                "max_overlap must lie in [0, {MAX_OVERLAP_SECS}], got {}",
                self.max_overlap
            )));
        }
        if !self.default_overlap.is_finite() {
            return Err(PipelineError::Config("default_overlap must be finite".into()));
        }
        if self.kernel_threads == Some(0) {
            return Err(PipelineError::Config("kernel_threads must be at least 1".into()));
        }
        Ok(())
    }

    /// Rounds a requested overlap to half seconds within `[0, max_overlap]`.
    pub fn effective_overlap(&self, requested: Option<f32>) -> f32 {
        let overlap = birdnet_audio::round_overlap(requested.unwrap_or(self.default_overlap));
        if overlap <= self.max_overlap {
            overlap
        } else {
            (self.max_overlap * 2.0).floor() / 2.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.sample_rate, 48_000);
        assert_eq!(cfg.window_size, 144_000);
        assert_eq!(cfg.default_overlap, 1.5);
        assert_eq!(cfg.top_n, 10);
        assert_eq!(cfg.backend, Backend::Cpu);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_partial_yaml() {
        let cfg = PipelineConfig::from_yaml("language: de\nbackend: parallel\nkernel_threads: 2\n").unwrap();
        assert_eq!(cfg.language.as_deref(), Some("de"));
        assert_eq!(cfg.backend, Backend::Parallel);
        assert_eq!(cfg.kernel_threads, Some(2));
        assert_eq!(cfg.window_size, WINDOW_SIZE);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            PipelineConfig::from_yaml("max_overlap: 4.0"),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_yaml("kernel_threads: 0"),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            PipelineConfig::from_yaml("backend: gpu"),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn overlap_rounding() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.effective_overlap(None), 1.5);
        assert_eq!(cfg.effective_overlap(Some(1.73)), 1.5);
        assert_eq!(cfg.effective_overlap(Some(3.0)), 2.5);
        assert_eq!(cfg.effective_overlap(Some(f32::NAN)), 0.0);

        let capped = PipelineConfig {
            max_overlap: 1.0,
            ..PipelineConfig::default()
        };
        assert_eq!(capped.effective_overlap(Some(2.0)), 1.0);
    }

    #[test]
    fn yaml_roundtrip_skips_unset_fields() {
        let yaml = serde_yaml::to_string(&PipelineConfig::default()).unwrap();
        assert!(!yaml.contains("model_root"));
        assert_eq!(PipelineConfig::from_yaml(&yaml).unwrap(), PipelineConfig::default());
    }
}
