//! Model and label assets.
//!
//! Assets live under one root, either a local directory or an HTTP(S) base
//! URL, with this layout:
//!
//! ```text
//! birdnet/model.onnx               acoustic scorer
//! birdnet/melspec.json             mel layer config (optional)
//! birdnet/area-model/model.onnx    geo model
//! birdnet/labels/<lang>.txt        one label per class
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use birdnet_audio::MelSpecConfig;
use once_cell::sync::Lazy;
use reqwest::StatusCode;
use url::Url;

use crate::model::{GeoModel, Scorer, ScorerInput};
use crate::PipelineError;

pub const SCORER_PATH: &str = "birdnet/model.onnx";
pub const MELSPEC_PATH: &str = "birdnet/melspec.json";
pub const GEO_MODEL_PATH: &str = "birdnet/area-model/model.onnx";

pub fn labels_path(language: &str) -> String {
    format!("birdnet/labels/{language}.txt")
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

/// Load progress callback, called with a fraction in `[0, 1]`.
pub type Progress<'a> = &'a (dyn Fn(f32) + Send + Sync);

/// Supplies the models and labels a pipeline needs.
///
/// Loading is asynchronous; the pipeline reports progress between calls.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Loads the acoustic scorer, reporting weight download progress.
    async fn load_scorer(&self, progress: Progress<'_>) -> Result<Arc<dyn Scorer>, PipelineError>;

    /// Mel layer parameters for scorers that take [`ScorerInput::Features`].
    async fn load_melspec(&self) -> Result<MelSpecConfig, PipelineError>;

    /// Loads the geo model. A failure leaves the pipeline without priors.
    async fn load_geo_model(&self) -> Result<Arc<dyn GeoModel>, PipelineError>;

    /// Raw label text for `language`.
    async fn load_labels(&self, language: &str) -> Result<String, PipelineError>;
}

/// Where assets are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Dir(PathBuf),
    Url(Url),
}

impl AssetSource {
    /// `http://` and `https://` roots are URLs, anything else a directory.
    pub fn parse(root: &str) -> Result<Self, PipelineError> {
        if root.starts_with("http://") || root.starts_with("https://") {
            let mut url = Url::parse(root).map_err(|e| PipelineError::Config(format!("model root {root}: {e}")))?;
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            Ok(Self::Url(url))
        } else {
            Ok(Self::Dir(PathBuf::from(root)))
        }
    }

    /// Human-readable location of `rel`.
    pub fn locate(&self, rel: &str) -> String {
        match self {
            Self::Dir(root) => root.join(rel).display().to_string(),
            Self::Url(base) => base.join(rel).map_or_else(|_| format!("{base}{rel}"), String::from),
        }
    }

    /// Reads `rel`, or `Ok(None)` when it does not exist.
    pub async fn fetch_optional(&self, rel: &str, progress: Progress<'_>) -> Result<Option<Vec<u8>>, PipelineError> {
        match self {
            Self::Dir(root) => {
                let path = root.join(rel);
                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        progress(1.0);
                        Ok(Some(bytes))
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(PipelineError::asset(path.display().to_string(), e)),
                }
            }
            Self::Url(base) => {
                let url = base.join(rel).map_err(|e| PipelineError::asset(rel, e))?;
                let mut response = HTTP_CLIENT
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| PipelineError::asset(url.as_str(), e))?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    return Err(PipelineError::asset(url.as_str(), format!("HTTP {}", response.status())));
                }

                let total = response.content_length().filter(|t| *t > 0);
                let mut body = Vec::with_capacity(total.unwrap_or(0) as usize);
                while let Some(chunk) = response
                    .chunk()
                    .await
                    .map_err(|e| PipelineError::asset(url.as_str(), e))?
                {
                    body.extend_from_slice(&chunk);
                    if let Some(total) = total {
                        progress((body.len() as f64 / total as f64).min(1.0) as f32);
                    }
                }
                progress(1.0);
                Ok(Some(body))
            }
        }
    }

    /// Reads `rel`; a missing asset is an error.
    pub async fn fetch(&self, rel: &str, progress: Progress<'_>) -> Result<Vec<u8>, PipelineError> {
        self.fetch_optional(rel, progress)
            .await?
            .ok_or_else(|| PipelineError::asset(self.locate(rel), "not found"))
    }

    pub async fn fetch_text(&self, rel: &str) -> Result<String, PipelineError> {
        let bytes = self.fetch(rel, &|_| {}).await?;
        String::from_utf8(bytes).map_err(|e| PipelineError::asset(self.locate(rel), e))
    }
}

/// [`ModelLoader`] reading the standard asset layout from an [`AssetSource`].
///
/// ONNX models need the `ort` feature; without it, loading the scorer fails
/// and the geo model is reported missing.
#[derive(Debug, Clone)]
pub struct AssetLoader {
    source: AssetSource,
    scorer_input: ScorerInput,
}

impl AssetLoader {
    pub fn new(source: AssetSource) -> Self {
        Self {
            source,
            scorer_input: ScorerInput::Samples,
        }
    }

    /// Declares what the scorer model takes as input. Defaults to raw samples.
    pub fn with_scorer_input(mut self, input: ScorerInput) -> Self {
        self.scorer_input = input;
        self
    }

    /// Picks the scorer input from the asset layout: a model root that ships
    /// `melspec.json` feeds the scorer spectrograms, one without it feeds raw
    /// samples.
    pub async fn with_detected_input(self) -> Result<Self, PipelineError> {
        let input = match self.source.fetch_optional(MELSPEC_PATH, &|_| {}).await? {
            Some(_) => ScorerInput::Features,
            None => ScorerInput::Samples,
        };
        tracing::debug!(?input, "scorer input detected");
        Ok(self.with_scorer_input(input))
    }

    pub fn source(&self) -> &AssetSource {
        &self.source
    }

    pub fn scorer_input(&self) -> ScorerInput {
        self.scorer_input
    }
}

#[async_trait]
impl ModelLoader for AssetLoader {
    #[cfg(feature = "ort")]
    async fn load_scorer(&self, progress: Progress<'_>) -> Result<Arc<dyn Scorer>, PipelineError> {
        use crate::model_ort::{OrtScorer, OrtScorerConfig};

        let mut cfg = OrtScorerConfig {
            input: self.scorer_input,
            ..OrtScorerConfig::default()
        };
        if self.scorer_input == ScorerInput::Features {
            cfg.spec_shape = self.load_melspec().await?.spec_shape;
        }
        let bytes = self.source.fetch(SCORER_PATH, progress).await?;
        tracing::info!(bytes = bytes.len(), path = %self.source.locate(SCORER_PATH), "scorer weights fetched");
        let scorer = tokio::task::spawn_blocking(move || OrtScorer::from_memory(&bytes, cfg))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))??;
        Ok(Arc::new(scorer))
    }

    #[cfg(not(feature = "ort"))]
    async fn load_scorer(&self, _progress: Progress<'_>) -> Result<Arc<dyn Scorer>, PipelineError> {
        Err(PipelineError::Unsupported("ONNX scorer requires the `ort` feature"))
    }

    async fn load_melspec(&self) -> Result<MelSpecConfig, PipelineError> {
        match self.source.fetch_optional(MELSPEC_PATH, &|_| {}).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| PipelineError::asset(self.source.locate(MELSPEC_PATH), e)),
            None => {
                tracing::debug!("no mel layer config, using defaults");
                Ok(MelSpecConfig::default())
            }
        }
    }

    #[cfg(feature = "ort")]
    async fn load_geo_model(&self) -> Result<Arc<dyn GeoModel>, PipelineError> {
        use crate::model_ort::OrtGeoModel;

        let bytes = self.source.fetch(GEO_MODEL_PATH, &|_| {}).await?;
        let model = tokio::task::spawn_blocking(move || OrtGeoModel::from_memory(&bytes))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))??;
        Ok(Arc::new(model))
    }

    #[cfg(not(feature = "ort"))]
    async fn load_geo_model(&self) -> Result<Arc<dyn GeoModel>, PipelineError> {
        Err(PipelineError::Unsupported("ONNX geo model requires the `ort` feature"))
    }

    async fn load_labels(&self, language: &str) -> Result<String, PipelineError> {
        self.source.fetch_text(&labels_path(language)).await
    }
}
