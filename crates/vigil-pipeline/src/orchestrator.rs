//! Pipeline orchestrator.
//!
//! Owns three tasks per running session:
//! - the frame loop: detection on every frame, activity-gated enqueue
//! - the queue drain: takes at most one pending frame per poll tick
//! - the cadence timer: enqueues on a fixed interval regardless of activity
//!
//! Both enqueue paths consult the analyst's single [`CallBudget`], so the two
//! schedulers never jointly exceed it. The queue holds at most one frame.
//!
//! [`CallBudget`]: crate::budget::CallBudget

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbImage;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};
use vigil_models::{
    AnalysisRecord, DetectionContext, DetectionSignal, EscalationTrigger, PipelineState,
    SessionId, SpecialistProvider, SpecialistResult, STOPPED_DESCRIPTION,
};
use vigil_vision::{EncodedImage, ProviderConfig};

use crate::analyst::ThrottledAnalyst;
use crate::config::{AnalystBackend, PipelineConfig};
use crate::detector::{DetectionModel, LocalDetector, MotionModel};
use crate::error::{PipelineError, PipelineResult, SourceError, SpecialistError};
use crate::keywords::SubstringKeywords;
use crate::logging::PipelineLogger;
use crate::metrics::{
    record_auto_escalation, record_auto_escalation_skipped, record_frame, set_running,
};
use crate::sink::{NoopSink, ResultSink};
use crate::source::FrameSource;
use crate::specialist::{Escalation, SpecialistEscalator};

/// Receives every published state snapshot.
///
/// Snapshots are only published while the session that produced them is
/// live, plus one final snapshot from `stop()`.
pub trait StateObserver: Send + Sync {
    fn on_state(&self, state: &PipelineState);
}

impl<F> StateObserver for F
where
    F: Fn(&PipelineState) + Send + Sync,
{
    fn on_state(&self, state: &PipelineState) {
        self(state)
    }
}

/// Draws detection results over the video. Rendering lives outside the core.
pub trait Overlay: Send + Sync {
    fn draw(&self, signal: &DetectionSignal);
    fn clear(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOverlay;

impl Overlay for NoopOverlay {
    fn draw(&self, _signal: &DetectionSignal) {}
    fn clear(&self) {}
}

/// `analyst_busy` value when no drain is mid-call. Generations start at 1.
const IDLE: u64 = 0;

struct QueuedFrame {
    image: Arc<RgbImage>,
    seq: u64,
    context: DetectionContext,
}

struct Inner {
    config: PipelineConfig,
    detector: Mutex<LocalDetector>,
    analyst: ThrottledAnalyst,
    specialist: SpecialistEscalator,
    sink: Arc<dyn ResultSink>,
    overlay: Arc<dyn Overlay>,
    observers: Mutex<Vec<Arc<dyn StateObserver>>>,
    state: Mutex<PipelineState>,
    state_tx: watch::Sender<PipelineState>,
    queue: Mutex<Option<QueuedFrame>>,
    /// Generation whose drain is mid-call, or `IDLE`
    analyst_busy: AtomicU64,
    running: AtomicBool,
    generation: AtomicU64,
    frame_seq: AtomicU64,
    session: Mutex<SessionId>,
    logger: Mutex<PipelineLogger>,
    last_image: Mutex<Option<Arc<RgbImage>>>,
    /// Frame loop and cadence timer; aborted on stop
    scheduler_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The three-layer analysis pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

/// Assembles a [`Pipeline`] from injected layers.
pub struct PipelineBuilder {
    config: PipelineConfig,
    model: Box<dyn DetectionModel>,
    analyst: Option<ThrottledAnalyst>,
    specialist: Option<SpecialistEscalator>,
    sink: Arc<dyn ResultSink>,
    overlay: Arc<dyn Overlay>,
    observers: Vec<Arc<dyn StateObserver>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        let model = Box::new(MotionModel::new(config.detection_threshold));
        Self {
            config,
            model,
            analyst: None,
            specialist: None,
            sink: Arc::new(NoopSink),
            overlay: Arc::new(NoopOverlay),
            observers: Vec::new(),
        }
    }

    /// Wire analyst and specialist layers to the configured hosted providers.
    pub fn from_providers(config: PipelineConfig, providers: &ProviderConfig) -> PipelineResult<Self> {
        let client = providers.http_client()?;

        let analyst_provider = match config.analyst_backend {
            AnalystBackend::Gemini => providers.gemini_provider(&client),
            AnalystBackend::Xai => providers.specialist_provider(SpecialistProvider::Xai, &client),
        };
        let specialists = SpecialistProvider::ALL
            .iter()
            .filter_map(|kind| {
                providers
                    .specialist_provider(*kind, &client)
                    .map(|provider| (*kind, provider))
            })
            .collect();

        let analyst = ThrottledAnalyst::new(analyst_provider, config.analyst_budget)
            .with_keywords(Arc::new(SubstringKeywords::new(&config.analyst_keywords)))
            .with_error_backoff(config.error_backoff);
        let specialist =
            SpecialistEscalator::new(specialists, &config.specialist_order, config.specialist_budget)
                .with_critical_keywords(config.critical_keywords.clone());

        Ok(Self::new(config).with_analyst(analyst).with_specialist(specialist))
    }

    pub fn with_detection_model(mut self, model: Box<dyn DetectionModel>) -> Self {
        self.model = model;
        self
    }

    pub fn with_analyst(mut self, analyst: ThrottledAnalyst) -> Self {
        self.analyst = Some(analyst);
        self
    }

    pub fn with_specialist(mut self, specialist: SpecialistEscalator) -> Self {
        self.specialist = Some(specialist);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Pipeline {
        let analyst = self
            .analyst
            .unwrap_or_else(|| ThrottledAnalyst::new(None, self.config.analyst_budget));
        let specialist = self.specialist.unwrap_or_else(SpecialistEscalator::unavailable);

        let mut state = PipelineState::default();
        state.analyst.available = analyst.is_available();
        state.specialist.available = specialist.is_available();
        let (state_tx, _) = watch::channel(state.clone());

        let session = SessionId::new();
        let logger = PipelineLogger::new(&session, "orchestrator");
        let detector = LocalDetector::new(self.model, self.config.target_fps);

        Pipeline {
            inner: Arc::new(Inner {
                config: self.config,
                detector: Mutex::new(detector),
                analyst,
                specialist,
                sink: self.sink,
                overlay: self.overlay,
                observers: Mutex::new(self.observers),
                state: Mutex::new(state),
                state_tx,
                queue: Mutex::new(None),
                analyst_busy: AtomicU64::new(IDLE),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                frame_seq: AtomicU64::new(0),
                session: Mutex::new(session),
                logger: Mutex::new(logger),
                last_image: Mutex::new(None),
                scheduler_tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Start a new session over `source`. Must be called within a tokio runtime.
    pub fn start(&self, source: Arc<dyn FrameSource>) -> PipelineResult<SessionId> {
        self.inner.config.validate()?;
        if !source.supports_pixel_access() {
            return Err(PipelineError::Source(SourceError::unavailable(format!(
                "{} does not expose raw pixels",
                source.describe()
            ))));
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning);
        }

        let inner = &self.inner;
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = SessionId::new();
        let logger = PipelineLogger::new(&session, "orchestrator");
        *inner.session.lock() = session.clone();
        *inner.logger.lock() = logger.clone();

        inner.analyst.reset();
        inner.specialist.reset();
        inner.queue.lock().take();
        inner.analyst_busy.store(IDLE, Ordering::SeqCst);
        inner.frame_seq.store(0, Ordering::SeqCst);
        inner.last_image.lock().take();

        let detector_ready = inner.detector.lock().initialize().is_ok();
        if !inner.analyst.is_available() {
            logger.log_warning("analyst provider not configured, layer 2 disabled for this session");
        }
        if !inner.specialist.is_available() {
            logger.log_warning("no specialist provider configured, layer 3 disabled for this session");
        }

        {
            let mut state = inner.state.lock();
            *state = PipelineState::default();
            state.running = true;
            state.detector_ready = detector_ready;
            state.analyst.available = inner.analyst.is_available();
            state.specialist.available = inner.specialist.is_available();
        }

        let span = logger.create_span();
        let frame_task = tokio::spawn(
            Arc::clone(inner)
                .frame_loop(Arc::clone(&source), generation)
                .instrument(span.clone()),
        );
        let cadence_task = tokio::spawn(
            Arc::clone(inner)
                .cadence_loop(Arc::clone(&source), generation)
                .instrument(span.clone()),
        );
        // Not aborted on stop: an in-flight analyst call runs to completion
        tokio::spawn(Arc::clone(inner).drain_loop(generation).instrument(span));
        inner.scheduler_tasks.lock().extend([frame_task, cadence_task]);

        set_running(true);
        logger.log_start(&format!(
            "source={} fps={} detector_ready={}",
            source.describe(),
            inner.config.target_fps,
            detector_ready
        ));
        inner.publish(generation);
        Ok(session)
    }

    /// Stop the running session. No-op when already stopped.
    pub fn stop(&self) {
        self.inner.stop_session(None, "stopped by caller");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Copy of the current state.
    pub fn state(&self) -> PipelineState {
        self.inner.state.lock().clone()
    }

    /// Receiver that always holds the latest published state.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.inner.state_tx.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn StateObserver>) {
        self.inner.observers.lock().push(observer);
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session.lock().clone()
    }

    /// Pending analyst frames: always 0 or 1.
    pub fn queue_len(&self) -> usize {
        usize::from(self.inner.queue.lock().is_some())
    }

    pub fn is_specialist_available(&self) -> bool {
        self.inner.specialist.is_available()
    }

    /// Run a specialist analysis on `image`, or on the latest frame.
    ///
    /// Rejections (`Unavailable`, `RateLimited`) and provider failures are
    /// also recorded in `state.specialist.last_error`. `AlreadyInProgress`
    /// leaves the state untouched.
    pub async fn trigger_specialist(
        &self,
        image: Option<Arc<RgbImage>>,
        trigger: EscalationTrigger,
        provider: Option<SpecialistProvider>,
    ) -> PipelineResult<SpecialistResult> {
        let inner = &self.inner;
        let generation = inner.generation.load(Ordering::SeqCst);
        let was_live = inner.is_live(generation);

        let escalation = match inner.specialist.begin(provider) {
            Ok(escalation) => escalation,
            Err(e) => {
                inner.record_specialist_rejection(&e, generation, was_live);
                return Err(e.into());
            }
        };

        let image = image
            .or_else(|| inner.last_image.lock().clone())
            .ok_or(PipelineError::NoFrame)?;
        let context = inner.state.lock().detection.context();

        let task = tokio::spawn(Arc::clone(inner).run_escalation(
            escalation,
            image,
            Some(context),
            trigger,
            generation,
            was_live,
        ));
        task.await
            .map_err(|e| PipelineError::TaskFailed(e.to_string()))?
    }
}

impl Inner {
    fn is_live(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Whether a result started under `generation` may still touch the state.
    fn may_apply(&self, generation: u64, was_live: bool) -> bool {
        if was_live {
            self.is_live(generation)
        } else {
            self.generation.load(Ordering::SeqCst) == generation
        }
    }

    fn logger(&self) -> PipelineLogger {
        self.logger.lock().clone()
    }

    /// Stop if running and, when given, still on `expected` generation.
    fn stop_session(&self, expected: Option<u64>, reason: &str) -> bool {
        if let Some(generation) = expected {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
        }
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        for task in self.scheduler_tasks.lock().drain(..) {
            task.abort();
        }
        self.queue.lock().take();
        self.overlay.clear();

        let snapshot = {
            let mut state = self.state.lock();
            state.running = false;
            state.analyst.description = STOPPED_DESCRIPTION.to_string();
            state.analyst.keywords.clear();
            state.analyst.next_update_in_ms = 0;
            state.specialist.is_processing = false;
            state.clone()
        };

        set_running(false);
        self.logger().log_completion(reason);
        self.notify(snapshot);
        true
    }

    /// Refresh derived fields and publish, if `generation` is still live.
    fn publish(&self, generation: u64) {
        if !self.is_live(generation) {
            return;
        }
        self.publish_unchecked();
    }

    fn publish_unchecked(&self) {
        let analyst_budget = self.analyst.budget_snapshot();
        let specialist_budget = self.specialist.budget_snapshot();
        let snapshot = {
            let mut state = self.state.lock();
            state.analyst.budget = analyst_budget;
            state.analyst.next_update_in_ms = analyst_budget.time_until_next_call_ms;
            state.specialist.budget = specialist_budget;
            state.clone()
        };
        self.notify(snapshot);
    }

    fn notify(&self, snapshot: PipelineState) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.on_state(&snapshot);
        }
        self.state_tx.send_replace(snapshot);
    }

    /// Offer a frame to the analyst. Rejected when a frame is pending, the
    /// analyst is mid-call, or the budget disallows a call now.
    fn try_enqueue(&self, image: Arc<RgbImage>, seq: u64, context: DetectionContext) -> bool {
        if !self.analyst.is_available() {
            return false;
        }
        let mut queue = self.queue.lock();
        if queue.is_some() || self.analyst_busy.load(Ordering::SeqCst) != IDLE {
            return false;
        }
        if !self.analyst.can_call_now() {
            return false;
        }
        *queue = Some(QueuedFrame {
            image,
            seq,
            context,
        });
        true
    }

    fn take_queued(&self, generation: u64) -> Option<QueuedFrame> {
        let mut queue = self.queue.lock();
        let task = queue.take();
        if task.is_some() {
            self.analyst_busy.store(generation, Ordering::SeqCst);
        }
        task
    }

    async fn frame_loop(self: Arc<Self>, source: Arc<dyn FrameSource>, generation: u64) {
        let mut ticker = interval(self.config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !self.is_live(generation) {
                break;
            }
            if source.has_ended() {
                self.stop_session(Some(generation), "end of stream");
                break;
            }
            let Some(frame) = source.current_frame() else {
                continue;
            };

            let (signal, deadline_misses) = {
                let mut detector = self.detector.lock();
                let signal = detector.detect(&frame);
                (signal, detector.deadline_misses())
            };
            let seq = self.frame_seq.fetch_add(1, Ordering::SeqCst) + 1;
            record_frame();

            if signal.has_activity {
                self.overlay.draw(&signal);
            } else {
                self.overlay.clear();
            }

            let context = signal.context();
            let has_activity = signal.has_activity;
            {
                let mut state = self.state.lock();
                state.detection = signal;
                state.stats.frames_processed += 1;
                state.stats.deadline_misses = deadline_misses;
            }
            *self.last_image.lock() = Some(Arc::clone(&frame.image));

            if has_activity && self.try_enqueue(frame.image, seq, context) {
                debug!(frame_seq = seq, "Activity frame queued for analyst");
            }
            self.publish(generation);
        }
    }

    async fn cadence_loop(self: Arc<Self>, source: Arc<dyn FrameSource>, generation: u64) {
        // First tick fires immediately
        let mut ticker = interval(self.config.analysis_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.is_live(generation) {
                break;
            }
            let Some(frame) = source.current_frame() else {
                continue;
            };
            let seq = self.frame_seq.load(Ordering::SeqCst);
            let context = self.state.lock().detection.context();
            if self.try_enqueue(frame.image, seq, context) {
                debug!(frame_seq = seq, "Scheduled frame queued for analyst");
            }
        }
    }

    async fn drain_loop(self: Arc<Self>, generation: u64) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !self.is_live(generation) {
                break;
            }
            let Some(task) = self.take_queued(generation) else {
                continue;
            };
            self.run_analysis(task, generation).await;
            // A restart during the call already reset the flag for its own session
            let _ = self.analyst_busy.compare_exchange(
                generation,
                IDLE,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
        debug!(generation, "Queue drain exited");
    }

    async fn run_analysis(self: &Arc<Self>, task: QueuedFrame, generation: u64) {
        let encoded = match EncodedImage::from_rgb(&task.image, self.config.jpeg_quality) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(frame_seq = task.seq, error = %e, "Failed to encode frame for analyst");
                return;
            }
        };

        let result = self.analyst.analyze(&encoded, task.seq, task.context).await;
        if !self.is_live(generation) {
            debug!(frame_seq = task.seq, "Discarding analyst result from stopped session");
            return;
        }

        let fresh = result.trigger_reason.is_fresh();
        {
            let mut state = self.state.lock();
            state.analyst.description = result.description.clone();
            if fresh {
                state.analyst.keywords = result.keywords.clone();
                state.stats.analyst_calls_made += 1;
                state.stats.analyst_tokens += result.usage.map_or(0, |u| u.total_tokens);
            }
            state.analyst.latest = Some(result.clone());
        }

        if fresh {
            let escalate =
                self.config.auto_escalate && self.specialist.should_auto_trigger(&result.keywords);
            self.persist(AnalysisRecord::Analyst {
                session_id: self.session.lock().clone(),
                result,
            });
            if escalate {
                self.auto_escalate(task.image, task.context, generation);
            }
        }
        self.publish(generation);
    }

    /// One specialist call per qualifying analyst result.
    fn auto_escalate(self: &Arc<Self>, image: Arc<RgbImage>, context: DetectionContext, generation: u64) {
        let escalation = match self.specialist.begin(Some(self.config.auto_provider)) {
            Ok(escalation) => escalation,
            Err(e) => {
                self.state.lock().stats.auto_escalations_skipped += 1;
                record_auto_escalation_skipped(e.kind());
                info!(error = %e, "Critical keywords detected, escalation skipped");
                self.record_specialist_rejection(&e, generation, true);
                return;
            }
        };

        self.state.lock().stats.auto_escalations_triggered += 1;
        record_auto_escalation();
        info!(provider = %escalation.provider(), "Critical keywords detected, escalating to specialist");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            // Failures are already surfaced in the state
            let _ = inner
                .run_escalation(escalation, image, Some(context), EscalationTrigger::Auto, generation, true)
                .await;
        });
    }

    fn record_specialist_rejection(&self, error: &SpecialistError, generation: u64, was_live: bool) {
        if matches!(error, SpecialistError::AlreadyInProgress) || !self.may_apply(generation, was_live) {
            return;
        }
        self.state.lock().specialist.last_error = Some(error.to_string());
        self.publish_for(generation, was_live);
    }

    async fn run_escalation(
        self: Arc<Self>,
        escalation: Escalation,
        image: Arc<RgbImage>,
        context: Option<DetectionContext>,
        trigger: EscalationTrigger,
        generation: u64,
        was_live: bool,
    ) -> PipelineResult<SpecialistResult> {
        let provider = escalation.provider();
        if self.may_apply(generation, was_live) {
            {
                let mut state = self.state.lock();
                state.specialist.is_processing = true;
                state.specialist.last_error = None;
            }
            self.publish_for(generation, was_live);
        }

        let outcome = match EncodedImage::from_rgb(&image, self.config.jpeg_quality) {
            Ok(encoded) => escalation.run(&encoded, context, trigger).await,
            Err(e) => {
                drop(escalation);
                Err(SpecialistError::Provider(e))
            }
        };

        if !self.may_apply(generation, was_live) {
            debug!(provider = %provider, "Discarding specialist result from stopped session");
            return outcome.map_err(Into::into);
        }

        {
            let mut state = self.state.lock();
            state.specialist.is_processing = false;
            match &outcome {
                Ok(result) => {
                    state.specialist.latest = Some(result.clone());
                    state.specialist.last_error = None;
                    state.stats.specialist_calls_made += 1;
                    state.stats.specialist_tokens += result.usage.map_or(0, |u| u.total_tokens);
                }
                Err(e) => {
                    state.specialist.last_error = Some(e.to_string());
                }
            }
        }

        if let Ok(result) = &outcome {
            self.persist(AnalysisRecord::Specialist {
                session_id: self.session.lock().clone(),
                result: result.clone(),
            });
        }
        self.publish_for(generation, was_live);
        outcome.map_err(Into::into)
    }

    fn publish_for(&self, generation: u64, was_live: bool) {
        if was_live {
            self.publish(generation);
        } else {
            self.publish_unchecked();
        }
    }

    fn persist(&self, record: AnalysisRecord) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.persist(&record).await {
                warn!(sink = sink.name(), kind = record.kind(), error = %e, "Failed to persist analysis record");
            }
        });
    }
}
