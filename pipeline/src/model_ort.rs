//! [`Scorer`] and [`GeoModel`] implementations on ONNX Runtime.

use std::sync::Mutex;

use ndarray::{Array2, Array4, ArrayD, ArrayViewD};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use crate::model::{GeoModel, ScoreBatch, Scorer, ScorerInput};
use crate::PipelineError;

fn model_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Model(e.to_string())
}

fn build_session(bytes: &[u8], intra_threads: usize) -> Result<Session, PipelineError> {
    Session::builder()
        .map_err(model_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(model_err)?
        .with_intra_threads(intra_threads.max(1))
        .map_err(model_err)?
        .commit_from_memory(bytes)
        .map_err(model_err)
}

/// Runs one batched inference and splits the first output into rows.
fn run_rows(session: &Mutex<Session>, input: ArrayD<f32>) -> Result<Vec<Vec<f32>>, PipelineError> {
    let batch = input.shape().first().copied().unwrap_or(0);
    if batch == 0 {
        return Ok(Vec::new());
    }
    let tensor = Tensor::from_array(input).map_err(model_err)?;
    let mut session = session
        .lock()
        .map_err(|_| PipelineError::Model("session lock poisoned".into()))?;
    let outputs = session.run(ort::inputs![tensor]).map_err(model_err)?;
    let output: ArrayViewD<f32> = outputs[0].try_extract_array().map_err(model_err)?;

    let flat: Vec<f32> = output.iter().copied().collect();
    let width = flat.len() / batch;
    if width == 0 || width * batch != flat.len() {
        return Err(PipelineError::Model(format!(
            "output of {} values does not split into {batch} rows",
            flat.len()
        )));
    }
    Ok(flat.chunks_exact(width).map(<[f32]>::to_vec).collect())
}

/// Options for [`OrtScorer`].
#[derive(Debug, Clone)]
pub struct OrtScorerConfig {
    pub input: ScorerInput,
    /// Samples per window, used when `input` is [`ScorerInput::Samples`].
    pub window_size: usize,
    /// `[mel_bins, frames]`, used when `input` is [`ScorerInput::Features`].
    pub spec_shape: [usize; 2],
    pub intra_threads: usize,
}

impl Default for OrtScorerConfig {
    fn default() -> Self {
        Self {
            input: ScorerInput::Samples,
            window_size: birdnet_audio::WINDOW_SIZE,
            spec_shape: [96, 511],
            intra_threads: 1,
        }
    }
}

/// Acoustic scorer backed by an ONNX model.
///
/// The class count is read from a single all-zero probe run at load time.
pub struct OrtScorer {
    session: Mutex<Session>,
    cfg: OrtScorerConfig,
    num_classes: usize,
}

impl OrtScorer {
    pub fn from_memory(bytes: &[u8], cfg: OrtScorerConfig) -> Result<Self, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::Model("empty model data".into()));
        }
        let session = Mutex::new(build_session(bytes, cfg.intra_threads)?);
        let probe = match cfg.input {
            ScorerInput::Samples => Array2::<f32>::zeros((1, cfg.window_size)).into_dyn(),
            ScorerInput::Features => {
                let [mel, frames] = cfg.spec_shape;
                Array4::<f32>::zeros((1, mel, frames, 1)).into_dyn()
            }
        };
        let num_classes = run_rows(&session, probe)?.first().map_or(0, Vec::len);
        tracing::info!(num_classes, input = ?cfg.input, "onnx scorer loaded");
        Ok(Self {
            session,
            cfg,
            num_classes,
        })
    }
}

impl Scorer for OrtScorer {
    fn input(&self) -> ScorerInput {
        self.cfg.input
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, batch: ScoreBatch<'_>) -> Result<Vec<Vec<f32>>, PipelineError> {
        let input = match batch {
            ScoreBatch::Samples(windows) => {
                let width = self.cfg.window_size;
                let mut data = Vec::with_capacity(windows.len() * width);
                for w in windows {
                    if w.samples().len() != width {
                        return Err(PipelineError::DimensionMismatch {
                            expected: width,
                            got: w.samples().len(),
                        });
                    }
                    data.extend_from_slice(w.samples());
                }
                Array2::from_shape_vec((windows.len(), width), data)
                    .map_err(model_err)?
                    .into_dyn()
            }
            ScoreBatch::Features(specs) => {
                let [mel, frames] = self.cfg.spec_shape;
                let mut data = Vec::with_capacity(specs.len() * mel * frames);
                for s in specs {
                    if s.shape() != [mel, frames, 1] {
                        return Err(PipelineError::DimensionMismatch {
                            expected: mel * frames,
                            got: s.as_slice().len(),
                        });
                    }
                    data.extend_from_slice(s.as_slice());
                }
                Array4::from_shape_vec((specs.len(), mel, frames, 1), data)
                    .map_err(model_err)?
                    .into_dyn()
            }
        };
        run_rows(&self.session, input)
    }
}

/// Location/season model backed by an ONNX model with a `[batch, 3]` input.
pub struct OrtGeoModel {
    session: Mutex<Session>,
    num_classes: usize,
}

impl OrtGeoModel {
    pub fn from_memory(bytes: &[u8]) -> Result<Self, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::Model("empty model data".into()));
        }
        let session = Mutex::new(build_session(bytes, 1)?);
        let probe = Array2::from_shape_vec((1, 3), vec![0.0f32, 0.0, 1.0])
            .map_err(model_err)?
            .into_dyn();
        let num_classes = run_rows(&session, probe)?.first().map_or(0, Vec::len);
        tracing::info!(num_classes, "onnx geo model loaded");
        Ok(Self {
            session,
            num_classes,
        })
    }
}

impl GeoModel for OrtGeoModel {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, queries: &[[f32; 3]]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let data: Vec<f32> = queries.iter().flatten().copied().collect();
        let input = Array2::from_shape_vec((queries.len(), 3), data)
            .map_err(model_err)?
            .into_dyn();
        run_rows(&self.session, input)
    }
}
