//! The pipeline worker.
//!
//! One background task loads the models, then serves predictions one at a
//! time in arrival order. Prior refreshes run on a second task so they can
//! overlap a prediction; both share the loaded [`Core`]. Heavy stages (mel
//! extraction, scoring, geo queries) go to the blocking pool.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use birdnet_audio::{Framing, SpectralExtractor, Window};
use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone};
use once_cell::sync::OnceCell;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assets::ModelLoader;
use crate::config::PipelineConfig;
use crate::geo::GeoFuser;
use crate::model::{check_rows, ScoreBatch, Scorer, ScorerInput};
use crate::pool::{PooledResult, TemporalPooler};
use crate::protocol::{AreaScores, Event, GeoRequest, Phase, PredictRequest, State};
use crate::roster::{resolve_language, Roster, DEFAULT_LANGUAGE};
use crate::PipelineError;

/// Handle to a running pipeline.
///
/// Requests sent before loading finishes are queued and served once the
/// pipeline is ready, or answered with [`PipelineError::LoadFailed`].
pub struct Pipeline {
    predict_tx: mpsc::UnboundedSender<PredictRequest>,
    geo_tx: mpsc::UnboundedSender<GeoRequest>,
    state: watch::Receiver<State>,
    load_error: Arc<OnceCell<String>>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Starts loading in the background and returns the handle with its
    /// event stream. Must be called within a tokio runtime.
    pub fn spawn(cfg: PipelineConfig, loader: Arc<dyn ModelLoader>) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (predict_tx, predict_rx) = mpsc::unbounded_channel();
        let (geo_tx, geo_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(State::Uninitialized);
        let cancel = CancellationToken::new();
        let load_error = Arc::new(OnceCell::new());

        let worker = Worker {
            cfg,
            events: Emitter(event_tx),
            activity: Arc::new(Activity::new(state_tx)),
            load_error: load_error.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(worker.run(loader, predict_rx, geo_rx));

        let pipeline = Self {
            predict_tx,
            geo_tx,
            state: state_rx,
            load_error,
            cancel,
        };
        (pipeline, event_rx)
    }

    /// Scores a mono 48 kHz clip and pools it over its windows.
    ///
    /// `overlap` is in seconds; it is rounded to half seconds and capped by
    /// the config. `None` uses the configured default.
    pub async fn predict(&self, pcm: Vec<f32>, overlap: Option<f32>) -> Result<PooledResult, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.predict_tx
            .send(PredictRequest { pcm, overlap, reply })
            .map_err(|_| PipelineError::Closed)?;
        rx.await.map_err(|_| PipelineError::Closed)?
    }

    /// Refreshes the geo prior for a location at the current local time.
    ///
    /// Returns `Ok(None)` when the pipeline runs without a geo model.
    pub async fn area_scores(&self, latitude: f32, longitude: f32) -> Result<Option<AreaScores>, PipelineError> {
        self.area_scores_at(latitude, longitude, Local::now()).await
    }

    /// Like [`Pipeline::area_scores`], for an explicit timestamp. The week is
    /// taken from the timestamp's own calendar.
    pub async fn area_scores_at<Tz: TimeZone>(
        &self,
        latitude: f32,
        longitude: f32,
        at: DateTime<Tz>,
    ) -> Result<Option<AreaScores>, PipelineError> {
        let at: DateTime<FixedOffset> = at.with_timezone(&at.offset().fix());
        let (reply, rx) = oneshot::channel();
        self.geo_tx
            .send(GeoRequest {
                latitude,
                longitude,
                at,
                reply,
            })
            .map_err(|_| PipelineError::Closed)?;
        rx.await.map_err(|_| PipelineError::Closed)?
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<State> {
        self.state.clone()
    }

    /// Waits until loading finishes.
    pub async fn wait_ready(&self) -> Result<(), PipelineError> {
        let mut rx = self.state.clone();
        let state = *rx
            .wait_for(|s| s.is_loaded() || *s == State::Failed)
            .await
            .map_err(|_| PipelineError::Closed)?;
        if state == State::Failed {
            return Err(PipelineError::LoadFailed(self.load_error.get().cloned().unwrap_or_default()));
        }
        Ok(())
    }

    /// Stops accepting work. A request already being served completes;
    /// queued ones resolve to [`PipelineError::Closed`].
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[derive(Clone)]
struct Emitter(mpsc::UnboundedSender<Event>);

impl Emitter {
    fn emit(&self, event: Event) {
        if self.0.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// Derives the serving state from what is running.
struct Activity {
    state: watch::Sender<State>,
    predicting: AtomicBool,
    fusing: AtomicBool,
}

impl Activity {
    fn new(state: watch::Sender<State>) -> Self {
        Self {
            state,
            predicting: AtomicBool::new(false),
            fusing: AtomicBool::new(false),
        }
    }

    fn enter(&self, state: State) {
        self.state.send_replace(state);
    }

    fn set(&self, flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
        self.state.send_modify(|s| {
            *s = if self.predicting.load(Ordering::SeqCst) {
                State::Predicting
            } else if self.fusing.load(Ordering::SeqCst) {
                State::FusingGeo
            } else {
                State::Ready
            };
        });
    }
}

/// Load progress that never goes backwards.
struct ProgressGate {
    events: Emitter,
    last: AtomicU8,
}

impl ProgressGate {
    fn new(events: Emitter) -> Self {
        Self {
            events,
            last: AtomicU8::new(0),
        }
    }

    /// Reports the start of a phase.
    fn begin(&self, phase: Phase) {
        let percent = phase.start_percent();
        let prev = self.last.fetch_max(percent, Ordering::SeqCst);
        self.events.emit(Event::Progress {
            phase,
            percent: prev.max(percent),
        });
    }

    /// Reports progress within the scorer download; `fraction` in `[0, 1]`.
    fn advance(&self, fraction: f32) {
        let percent = (fraction.clamp(0.0, 1.0) * Phase::Warmup.start_percent() as f32) as u8;
        if self.last.fetch_max(percent, Ordering::SeqCst) < percent {
            self.events.emit(Event::Progress {
                phase: Phase::LoadModel,
                percent,
            });
        }
    }
}

#[derive(Clone)]
enum FrontEnd {
    Mel(Arc<SpectralExtractor>),
    Raw,
}

/// Scorer plus whatever it needs in front of it.
struct Scoring {
    scorer: Arc<dyn Scorer>,
    front_end: FrontEnd,
}

impl Scoring {
    async fn score(&self, windows: Arc<Vec<Window>>) -> Result<Vec<Vec<f32>>, PipelineError> {
        let features = match &self.front_end {
            FrontEnd::Mel(extractor) => {
                let extractor = extractor.clone();
                let windows = windows.clone();
                Some(blocking(move || Ok(extractor.extract_batch(&windows)?)).await?)
            }
            FrontEnd::Raw => None,
        };

        let count = windows.len();
        let scorer = self.scorer.clone();
        let scores = blocking(move || match &features {
            Some(features) => scorer.predict(ScoreBatch::Features(features)),
            None => scorer.predict(ScoreBatch::Samples(&windows)),
        })
        .await?;
        check_rows(&scores, count, self.scorer.num_classes())?;
        Ok(scores)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?
}

/// Everything a loaded pipeline serves from.
struct Core {
    cfg: PipelineConfig,
    scoring: Scoring,
    roster: Roster,
    pooler: TemporalPooler,
    fuser: Arc<GeoFuser>,
    last_means: RwLock<Option<Arc<[f32]>>>,
    events: Emitter,
    activity: Arc<Activity>,
}

impl Core {
    async fn predict(&self, pcm: Vec<f32>, overlap: Option<f32>) -> Result<PooledResult, PipelineError> {
        let overlap = self.cfg.effective_overlap(overlap);
        let framing = Framing::from_overlap(overlap, self.cfg.sample_rate, self.cfg.window_size);
        let windows = Arc::new(framing.frame(&pcm));
        debug!(
            samples = pcm.len(),
            windows = windows.len(),
            overlap,
            hop = framing.hop,
            "predict"
        );

        let scores = self.scoring.score(windows).await?;
        let summaries = self.pooler.summarize(&scores, &self.roster)?;
        for s in &summaries {
            debug!(
                window = s.window,
                max = s.max,
                mean = s.mean,
                top = s.top.first().map(|t| t.name.as_str()).unwrap_or(""),
                "window scored"
            );
        }
        self.events.emit(Event::PredictDebug { windows: summaries });

        let means = self.pooler.pool(&scores)?;
        *self.last_means.write().await = Some(means.clone());
        let result = PooledResult::assemble(&means, &self.roster, &self.fuser.prior())?;
        self.events.emit(Event::Pooled(result.clone()));
        Ok(result)
    }

    async fn area_scores(
        &self,
        latitude: f32,
        longitude: f32,
        at: DateTime<FixedOffset>,
    ) -> Result<Option<AreaScores>, PipelineError> {
        if self.fuser.is_inert() {
            debug!("no geo model, area-scores ignored");
            return Ok(None);
        }
        let fuser = self.fuser.clone();
        let Some(update) = blocking(move || fuser.fuse(latitude, longitude, &at)).await? else {
            return Ok(None);
        };
        let prior_version = update.prior.version();
        info!(latitude, longitude, week = update.week, prior_version, "geo prior updated");
        self.events.emit(Event::AreaScores {
            week: update.week,
            prior_version,
        });

        let means = self.last_means.read().await.clone();
        let pooled = match means {
            Some(means) => {
                let result = PooledResult::assemble(&means, &self.roster, &update.prior)?;
                self.events.emit(Event::Pooled(result.clone()));
                Some(result)
            }
            None => None,
        };
        Ok(Some(AreaScores {
            week: update.week,
            prior_version,
            pooled,
        }))
    }
}

struct Worker {
    cfg: PipelineConfig,
    events: Emitter,
    activity: Arc<Activity>,
    load_error: Arc<OnceCell<String>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(
        self,
        loader: Arc<dyn ModelLoader>,
        mut predict_rx: mpsc::UnboundedReceiver<PredictRequest>,
        geo_rx: mpsc::UnboundedReceiver<GeoRequest>,
    ) {
        let core = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("pipeline cancelled while loading");
                return;
            }
            loaded = self.load(loader.as_ref()) => match loaded {
                Ok(core) => Arc::new(core),
                Err(e) => {
                    self.fail(e, predict_rx, geo_rx).await;
                    return;
                }
            },
        };

        let geo_task = tokio::spawn(serve_geo(core.clone(), geo_rx, self.cancel.clone()));

        loop {
            let req = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                req = predict_rx.recv() => match req {
                    Some(req) => req,
                    None => break,
                },
            };
            core.activity.set(&core.activity.predicting, true);
            let result = core.predict(req.pcm, req.overlap).await;
            core.activity.set(&core.activity.predicting, false);
            if let Err(e) = &result {
                warn!(error = %e, "predict failed");
                core.events.emit(Event::Error { error: e.to_string() });
            }
            let _ = req.reply.send(result);
        }

        if let Err(e) = geo_task.await {
            error!(error = %e, "geo task panicked");
        }
        debug!("pipeline worker stopped");
    }

    async fn load(&self, loader: &dyn ModelLoader) -> Result<Core, PipelineError> {
        self.cfg.validate()?;
        let progress = ProgressGate::new(self.events.clone());

        self.activity.enter(State::LoadingScorer);
        progress.begin(Phase::LoadModel);
        let scorer = loader.load_scorer(&|fraction| progress.advance(fraction)).await?;
        let classes = scorer.num_classes();
        if classes == 0 {
            return Err(PipelineError::Model("scorer reports zero classes".into()));
        }

        let front_end = match scorer.input() {
            ScorerInput::Features => {
                let mut mel = loader.load_melspec().await?;
                if let Some(scope) = self.cfg.normalize {
                    mel.normalize = scope;
                }
                let extractor = SpectralExtractor::new(mel, self.cfg.backend, self.cfg.kernel_threads)?;
                extractor.validate_window(self.cfg.window_size)?;
                FrontEnd::Mel(Arc::new(extractor))
            }
            ScorerInput::Samples => FrontEnd::Raw,
        };
        info!(classes, input = ?scorer.input(), backend = %self.cfg.backend, "scorer loaded");
        let scoring = Scoring { scorer, front_end };

        progress.begin(Phase::Warmup);
        let window_size = self.cfg.window_size;
        let silence = Arc::new(Framing::new(window_size, window_size).frame(&[]));
        scoring.score(silence).await?;

        self.activity.enter(State::LoadingGeoModel);
        progress.begin(Phase::LoadGeomodel);
        let geo_model = match loader.load_geo_model().await {
            Ok(model) => Some(model),
            Err(e) => {
                warn!(error = %e, "geo model unavailable, priors stay at 1.0");
                None
            }
        };

        self.activity.enter(State::LoadingRoster);
        progress.begin(Phase::LoadLabels);
        let language = resolve_language(self.cfg.language.as_deref());
        let base = loader.load_labels(DEFAULT_LANGUAGE).await?;
        let localized = if language == DEFAULT_LANGUAGE {
            None
        } else {
            match loader.load_labels(language).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(language, error = %e, "localized labels unavailable, using base names");
                    None
                }
            }
        };
        let roster = Roster::parse(&base, localized.as_deref())?;
        if roster.len() != classes {
            return Err(PipelineError::DimensionMismatch {
                expected: classes,
                got: roster.len(),
            });
        }

        let fuser = Arc::new(GeoFuser::new(geo_model, classes));
        let geo_model = !fuser.is_inert();
        info!(classes, language, geo_model, "pipeline loaded");

        let core = Core {
            cfg: self.cfg.clone(),
            scoring,
            roster,
            pooler: TemporalPooler::new(classes, self.cfg.top_n),
            fuser,
            last_means: RwLock::new(None),
            events: self.events.clone(),
            activity: self.activity.clone(),
        };
        self.activity.enter(State::Ready);
        self.events.emit(Event::Loaded {
            classes,
            language,
            geo_model,
        });
        Ok(core)
    }

    /// Parks the worker in `Failed`, answering every request with the load
    /// error until the handle goes away.
    async fn fail(
        &self,
        err: PipelineError,
        mut predict_rx: mpsc::UnboundedReceiver<PredictRequest>,
        mut geo_rx: mpsc::UnboundedReceiver<GeoRequest>,
    ) {
        let message = err.to_string();
        error!(error = %message, "pipeline failed to load");
        let _ = self.load_error.set(message.clone());
        self.activity.enter(State::Failed);
        self.events.emit(Event::Error {
            error: message.clone(),
        });

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(req) = predict_rx.recv() => {
                    let _ = req.reply.send(Err(PipelineError::LoadFailed(message.clone())));
                }
                Some(req) = geo_rx.recv() => {
                    let _ = req.reply.send(Err(PipelineError::LoadFailed(message.clone())));
                }
                else => break,
            }
        }
    }
}

async fn serve_geo(core: Arc<Core>, mut geo_rx: mpsc::UnboundedReceiver<GeoRequest>, cancel: CancellationToken) {
    loop {
        let req = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            req = geo_rx.recv() => match req {
                Some(req) => req,
                None => return,
            },
        };
        core.activity.set(&core.activity.fusing, true);
        let result = core.area_scores(req.latitude, req.longitude, req.at).await;
        core.activity.set(&core.activity.fusing, false);
        if let Err(e) = &result {
            warn!(error = %e, "area-scores failed");
            core.events.emit(Event::Error { error: e.to_string() });
        }
        let _ = req.reply.send(result);
    }
}
