use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use birdnet_audio::MelSpecConfig;
use birdnet_pipeline::{
    Event, GeoModel, ModelLoader, Phase, Pipeline, PipelineConfig, PipelineError, Progress, ScoreBatch, Scorer,
    ScorerInput, State,
};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};

const CLASSES: usize = 3;

/// Scores each window by its first sample, offset per class.
struct SampleScorer;

impl Scorer for SampleScorer {
    fn input(&self) -> ScorerInput {
        ScorerInput::Samples
    }

    fn num_classes(&self) -> usize {
        CLASSES
    }

    fn predict(&self, batch: ScoreBatch<'_>) -> Result<Vec<Vec<f32>>, PipelineError> {
        let ScoreBatch::Samples(windows) = batch else {
            return Err(PipelineError::Model("expected raw samples".into()));
        };
        Ok(windows
            .iter()
            .map(|w| (0..CLASSES).map(|c| w.samples()[0] + 0.1 * c as f32).collect())
            .collect())
    }
}

/// Records the spectrogram shapes it is fed.
struct FeatureScorer {
    shapes: Arc<Mutex<Vec<[usize; 3]>>>,
}

impl Scorer for FeatureScorer {
    fn input(&self) -> ScorerInput {
        ScorerInput::Features
    }

    fn num_classes(&self) -> usize {
        CLASSES
    }

    fn predict(&self, batch: ScoreBatch<'_>) -> Result<Vec<Vec<f32>>, PipelineError> {
        let ScoreBatch::Features(specs) = batch else {
            return Err(PipelineError::Model("expected spectrograms".into()));
        };
        let mut shapes = self.shapes.lock().unwrap();
        Ok(specs
            .iter()
            .map(|spec| {
                shapes.push(spec.shape());
                vec![0.5; CLASSES]
            })
            .collect())
    }
}

struct FixedGeo;

impl GeoModel for FixedGeo {
    fn num_classes(&self) -> usize {
        CLASSES
    }

    fn predict(&self, queries: &[[f32; 3]]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(queries
            .iter()
            .map(|_| (0..CLASSES).map(|c| 1.0 / (c + 2) as f32).collect())
            .collect())
    }
}

#[derive(Clone)]
struct FakeLoader {
    input: ScorerInput,
    geo: bool,
    labels: HashMap<&'static str, String>,
    melspec: MelSpecConfig,
    gate: Option<Arc<Notify>>,
    shapes: Arc<Mutex<Vec<[usize; 3]>>>,
}

fn base_labels(n: usize) -> String {
    (0..n).map(|i| format!("Sci {i}_Bird {i}\n")).collect()
}

impl FakeLoader {
    fn new() -> Self {
        Self {
            input: ScorerInput::Samples,
            geo: false,
            labels: HashMap::from([("en_us", base_labels(CLASSES))]),
            melspec: MelSpecConfig::default(),
            gate: None,
            shapes: Arc::default(),
        }
    }

    fn with_geo(mut self) -> Self {
        self.geo = true;
        self
    }
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load_scorer(&self, progress: Progress<'_>) -> Result<Arc<dyn Scorer>, PipelineError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        for fraction in [0.0, 0.5, 0.25, 1.0] {
            progress(fraction);
        }
        Ok(match self.input {
            ScorerInput::Samples => Arc::new(SampleScorer),
            ScorerInput::Features => Arc::new(FeatureScorer {
                shapes: self.shapes.clone(),
            }),
        })
    }

    async fn load_melspec(&self) -> Result<MelSpecConfig, PipelineError> {
        Ok(self.melspec.clone())
    }

    async fn load_geo_model(&self) -> Result<Arc<dyn GeoModel>, PipelineError> {
        if self.geo {
            Ok(Arc::new(FixedGeo))
        } else {
            Err(PipelineError::Unsupported("no geo model in this fixture"))
        }
    }

    async fn load_labels(&self, language: &str) -> Result<String, PipelineError> {
        self.labels
            .get(language)
            .cloned()
            .ok_or_else(|| PipelineError::Asset {
                path: format!("labels/{language}.txt"),
                reason: "not found".into(),
            })
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// Skips events until one matches.
async fn wait_for<F: Fn(&Event) -> bool>(events: &mut mpsc::UnboundedReceiver<Event>, pred: F) -> Event {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

fn ramp(len: usize) -> Vec<f32> {
    (0..len).map(|i| i as f32 / len as f32).collect()
}

fn utc(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

#[tokio::test]
async fn predict_pools_window_means() {
    let (pipeline, mut events) = Pipeline::spawn(PipelineConfig::default(), Arc::new(FakeLoader::new()));
    pipeline.wait_ready().await.unwrap();

    // 6 s at 1.5 s overlap: windows start at 0, 1.5 and 3 s.
    let result = pipeline.predict(ramp(288_000), Some(1.5)).await.unwrap();
    assert_eq!(result.len(), CLASSES);
    assert_eq!(result.prior_version, 0);
    for (c, class) in result.pooled.iter().enumerate() {
        let want = 0.25 + 0.1 * c as f32;
        assert!((class.confidence - want).abs() < 1e-5, "class {c}: {}", class.confidence);
        assert_eq!(class.geoscore, 1.0);
        assert_eq!(class.name, format!("Bird {c}"));
    }

    let debug = wait_for(&mut events, |e| matches!(e, Event::PredictDebug { .. })).await;
    let Event::PredictDebug { windows } = debug else { unreachable!() };
    assert_eq!(windows.len(), 3);
    assert_eq!(windows[2].top[0].index, CLASSES - 1);

    let pooled = next_event(&mut events).await;
    assert!(matches!(pooled, Event::Pooled(ref r) if *r == result));
    assert_eq!(pipeline.state(), State::Ready);
}

#[tokio::test]
async fn short_clip_is_one_padded_window() {
    let (pipeline, _events) = Pipeline::spawn(PipelineConfig::default(), Arc::new(FakeLoader::new()));
    let result = pipeline.predict(vec![0.75; 1_000], None).await.unwrap();
    assert!((result.pooled[0].confidence - 0.75).abs() < 1e-6);
}

#[tokio::test]
async fn progress_is_monotonic_then_loaded() {
    let (pipeline, mut events) = Pipeline::spawn(PipelineConfig::default(), Arc::new(FakeLoader::new()));
    pipeline.wait_ready().await.unwrap();

    let mut percents = Vec::new();
    let mut phases = Vec::new();
    loop {
        match next_event(&mut events).await {
            Event::Progress { phase, percent } => {
                percents.push(percent);
                if phases.last() != Some(&phase) {
                    phases.push(phase);
                }
            }
            Event::Loaded {
                classes,
                language,
                geo_model,
            } => {
                assert_eq!(classes, CLASSES);
                assert_eq!(language, "en_us");
                assert!(!geo_model);
                break;
            }
            other => panic!("unexpected event before load finished: {other:?}"),
        }
    }
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(percents.first(), Some(&0));
    assert_eq!(percents.last(), Some(&95));
    assert_eq!(
        phases,
        vec![Phase::LoadModel, Phase::Warmup, Phase::LoadGeomodel, Phase::LoadLabels]
    );
}

#[tokio::test]
async fn without_geo_model_priors_stay_at_one() {
    let (pipeline, mut events) = Pipeline::spawn(PipelineConfig::default(), Arc::new(FakeLoader::new()));
    pipeline.wait_ready().await.unwrap();

    let before = pipeline.predict(ramp(144_000), None).await.unwrap();
    let ack = pipeline
        .area_scores_at(52.5, 13.4, utc("2025-03-15T12:00:00Z"))
        .await
        .unwrap();
    assert!(ack.is_none());

    let after = pipeline.predict(ramp(144_000), None).await.unwrap();
    assert_eq!(before, after);
    assert!(after.pooled.iter().all(|c| c.geoscore == 1.0));

    // No area-scores acknowledgement was emitted.
    pipeline.shutdown();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
        assert!(!matches!(event, Event::AreaScores { .. }), "{event:?}");
    }
}

#[tokio::test]
async fn area_scores_refresh_prior_and_repool() {
    let loader = FakeLoader::new().with_geo();
    let (pipeline, mut events) = Pipeline::spawn(PipelineConfig::default(), Arc::new(loader));
    pipeline.wait_ready().await.unwrap();

    // Before any prediction there is nothing to re-pool.
    let first = pipeline
        .area_scores_at(52.5, 13.4, utc("2025-03-15T12:00:00Z"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.week, 12);
    assert_eq!(first.prior_version, 1);
    assert!(first.pooled.is_none());

    let predicted = pipeline.predict(ramp(288_000), Some(1.5)).await.unwrap();
    assert_eq!(predicted.prior_version, 1);
    assert!((predicted.pooled[0].geoscore - 0.5).abs() < 1e-6);

    let second = pipeline
        .area_scores_at(-33.9, 18.4, utc("2023-01-09T00:00:00Z"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.week, 2);
    assert_eq!(second.prior_version, 2);
    let repooled = second.pooled.unwrap();
    assert_eq!(repooled.prior_version, 2);
    for (old, new) in predicted.pooled.iter().zip(&repooled.pooled) {
        assert_eq!(old.confidence, new.confidence);
        assert_eq!(old.index, new.index);
    }

    // The acknowledgement comes before the re-pooled result.
    let ack = wait_for(&mut events, |e| matches!(e, Event::AreaScores { prior_version: 2, .. })).await;
    assert!(matches!(ack, Event::AreaScores { week: 2, .. }));
    let next = next_event(&mut events).await;
    assert!(matches!(next, Event::Pooled(ref r) if *r == repooled));
}

#[tokio::test]
async fn invalid_coordinates_surface_as_error() {
    let (pipeline, mut events) = Pipeline::spawn(PipelineConfig::default(), Arc::new(FakeLoader::new().with_geo()));
    pipeline.wait_ready().await.unwrap();

    let err = pipeline.area_scores(f32::NAN, 0.0).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    wait_for(&mut events, |e| matches!(e, Event::Error { .. })).await;

    // The prior is untouched.
    let result = pipeline.predict(ramp(144_000), None).await.unwrap();
    assert_eq!(result.prior_version, 0);
}

#[tokio::test]
async fn requests_queue_until_ready() {
    let gate = Arc::new(Notify::new());
    let loader = FakeLoader {
        gate: Some(gate.clone()),
        ..FakeLoader::new()
    };
    let (pipeline, _events) = Pipeline::spawn(PipelineConfig::default(), Arc::new(loader));
    let pipeline = Arc::new(pipeline);

    let pending = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.predict(ramp(144_000), None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pipeline.state().is_loaded());
    assert!(!pending.is_finished());

    gate.notify_one();
    let result = pending.await.unwrap().unwrap();
    assert_eq!(result.len(), CLASSES);
    assert!(pipeline.state().is_loaded());
}

#[tokio::test]
async fn label_count_mismatch_fails_load() {
    let loader = FakeLoader {
        labels: HashMap::from([("en_us", base_labels(CLASSES - 1))]),
        ..FakeLoader::new()
    };
    let (pipeline, mut events) = Pipeline::spawn(PipelineConfig::default(), Arc::new(loader));

    let err = pipeline.wait_ready().await.unwrap_err();
    assert!(matches!(err, PipelineError::LoadFailed(ref msg) if msg.contains("dimension mismatch")));
    assert_eq!(pipeline.state(), State::Failed);
    wait_for(&mut events, |e| matches!(e, Event::Error { .. })).await;

    assert!(matches!(
        pipeline.predict(vec![0.0; 10], None).await,
        Err(PipelineError::LoadFailed(_))
    ));
    assert!(matches!(
        pipeline.area_scores(0.0, 0.0).await,
        Err(PipelineError::LoadFailed(_))
    ));
}

#[tokio::test]
async fn localized_names_fall_back_to_base() {
    let mut loader = FakeLoader::new();
    loader.labels.insert("de", "Sci 0_Amsel\nSci 1_\n".to_string());
    let cfg = PipelineConfig {
        language: Some("de-AT".into()),
        ..PipelineConfig::default()
    };
    let (pipeline, mut events) = Pipeline::spawn(cfg, Arc::new(loader));

    let loaded = wait_for(&mut events, |e| matches!(e, Event::Loaded { .. })).await;
    assert!(matches!(loaded, Event::Loaded { language: "de", .. }));

    let result = pipeline.predict(ramp(144_000), None).await.unwrap();
    let names: Vec<&str> = result.pooled.iter().map(|c| c.name_i18n.as_str()).collect();
    assert_eq!(names, vec!["Amsel", "Bird 1", "Bird 2"]);
    assert_eq!(result.pooled[0].name, "Bird 0");
}

#[tokio::test]
async fn missing_localized_labels_use_base_names() {
    let cfg = PipelineConfig {
        language: Some("fr".into()),
        ..PipelineConfig::default()
    };
    let (pipeline, _events) = Pipeline::spawn(cfg, Arc::new(FakeLoader::new()));
    let result = pipeline.predict(ramp(144_000), None).await.unwrap();
    assert!(result.pooled.iter().all(|c| c.name == c.name_i18n));
}

#[tokio::test]
async fn feature_scorer_receives_spectrograms() {
    let loader = FakeLoader {
        input: ScorerInput::Features,
        melspec: MelSpecConfig {
            spec_shape: [8, 23],
            frame_step: 2048,
            frame_length: 2048,
            ..MelSpecConfig::default()
        },
        ..FakeLoader::new()
    };
    let shapes = loader.shapes.clone();
    let cfg = PipelineConfig {
        window_size: 48_000,
        ..PipelineConfig::default()
    };
    let (pipeline, _events) = Pipeline::spawn(cfg, Arc::new(loader));
    pipeline.wait_ready().await.unwrap();
    assert_eq!(shapes.lock().unwrap().len(), 1, "warm-up window");

    // 2 s in 1 s windows at 0.5 s overlap: three windows.
    let pcm: Vec<f32> = (0..96_000).map(|i| (i as f32 * 0.05).sin()).collect();
    let result = pipeline.predict(pcm, Some(0.5)).await.unwrap();
    assert!(result.pooled.iter().all(|c| (c.confidence - 0.5).abs() < 1e-6));

    let shapes = shapes.lock().unwrap();
    assert_eq!(shapes.len(), 4);
    assert!(shapes.iter().all(|s| *s == [8, 23, 1]));
}

#[tokio::test]
async fn mel_layer_mismatch_fails_load() {
    let loader = FakeLoader {
        input: ScorerInput::Features,
        melspec: MelSpecConfig {
            spec_shape: [8, 24],
            frame_step: 2048,
            frame_length: 2048,
            ..MelSpecConfig::default()
        },
        ..FakeLoader::new()
    };
    let cfg = PipelineConfig {
        window_size: 48_000,
        ..PipelineConfig::default()
    };
    let (pipeline, _events) = Pipeline::spawn(cfg, Arc::new(loader));
    assert!(matches!(pipeline.wait_ready().await, Err(PipelineError::LoadFailed(_))));
}

#[tokio::test]
async fn shutdown_closes_pipeline() {
    let (pipeline, _events) = Pipeline::spawn(PipelineConfig::default(), Arc::new(FakeLoader::new()));
    pipeline.wait_ready().await.unwrap();
    pipeline.shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(
        pipeline.predict(vec![0.0; 10], None).await,
        Err(PipelineError::Closed)
    ));
}
