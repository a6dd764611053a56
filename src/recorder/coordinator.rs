//! Recording coordinator
//!
//! [`RecordingStateMachine`] drives one platform recorder through the
//! ready → countdown → recording ⇄ paused → stopping → stopped lifecycle.
//!
//! Every async continuation (countdown, recorder events, timers) carries the
//! session generation it was started for. A reset or teardown bumps the
//! generation, so late continuations find a mismatch and drop their results.
//! The stop handler is guarded by a per-recorder flag and runs its effects at
//! most once no matter how many triggers fire.

use super::mime::select_mime_type;
use super::platform::{PlatformRecorder, RecorderEvent, RecorderEventStream, RecorderFactory};
use super::state::{MachineSnapshot, RecordedArtifact, RecordingSession, RecordingState};
use crate::capture::CaptureStream;
use crate::cleanup::CleanupCoordinator;
use crate::config::RecorderSettings;
use crate::resilience::classify;
use crate::utils::error::{ClassifiedError, EngineResult, RawError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Countdown tick (seconds remaining)
    CountdownTick(u32),
    /// Initial countdown cancelled before recording started
    CountdownCancelled,
    /// Recording started
    Started { mime_type: String },
    /// Recording paused
    Paused,
    /// Recording resumed
    Resumed,
    /// A data segment was captured and assigned an index
    ChunkCaptured { index: u32, size: usize },
    /// Stop requested
    Stopping,
    /// Recording stopped and the artifact is assembled
    Stopped(Arc<RecordedArtifact>),
    /// Session data discarded
    Reset,
    /// Recording progress update (elapsed ms)
    Progress(u64),
    /// Error occurred
    Error(ClassifiedError),
}

/// Lifecycle errors raised by the state machine itself
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("No capture stream is attached")]
    NoStream,

    #[error("The capture stream has already been released")]
    StreamReleased,

    #[error("Cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: RecordingState,
    },

    #[error("The recording session was closed")]
    TornDown,
}

impl From<RecorderError> for ClassifiedError {
    fn from(error: RecorderError) -> Self {
        ClassifiedError::invalid_input("recorder", error.to_string())
    }
}

/// Receives captured segments as soon as their index is assigned
pub trait SegmentSink: Send + Sync {
    fn accept(&self, index: u32, data: Arc<Vec<u8>>);
}

/// Per-recorder bookkeeping shared by every stop trigger
struct RecorderScope {
    generation: u64,
    recorder: Arc<dyn PlatformRecorder>,
    stop_requested: AtomicBool,
    stop_handled: AtomicBool,
    suppress_finalize: AtomicBool,
    /// Stream captured when stop was requested
    release_target: Mutex<Option<CaptureStream>>,
}

impl RecorderScope {
    fn new(generation: u64, recorder: Arc<dyn PlatformRecorder>) -> Self {
        Self {
            generation,
            recorder,
            stop_requested: AtomicBool::new(false),
            stop_handled: AtomicBool::new(false),
            suppress_finalize: AtomicBool::new(false),
            release_target: Mutex::new(None),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CountdownPurpose {
    Start,
    Resume,
}

#[derive(Default)]
struct Inner {
    session: Option<RecordingSession>,
    stream: Option<CaptureStream>,
    generation: u64,
    scope: Option<Arc<RecorderScope>>,
    sink: Option<Arc<dyn SegmentSink>>,
    countdown: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Inner {
    fn state(&self) -> RecordingState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(RecordingState::Idle)
    }

    fn abort_countdown(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }

    fn abort_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

struct Shared {
    factory: Arc<dyn RecorderFactory>,
    settings: RecorderSettings,
    cleanup: CleanupCoordinator,
    event_tx: broadcast::Sender<RecordingEvent>,
    inner: Mutex<Inner>,
}

/// Owns the record/pause/resume/stop lifecycle of one session at a time
#[derive(Clone)]
pub struct RecordingStateMachine {
    shared: Arc<Shared>,
}

impl RecordingStateMachine {
    /// Create a new state machine
    pub fn new(factory: Arc<dyn RecorderFactory>, settings: RecorderSettings, cleanup: CleanupCoordinator) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                factory,
                settings,
                cleanup,
                event_tx,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        self.shared.inner.lock().state()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        let inner = self.shared.inner.lock();
        match &inner.session {
            Some(session) => MachineSnapshot::from(session),
            None => MachineSnapshot::idle(),
        }
    }

    pub fn artifact(&self) -> Option<Arc<RecordedArtifact>> {
        let inner = self.shared.inner.lock();
        inner.session.as_ref().and_then(|session| session.artifact().cloned())
    }

    /// Stream attached to the current session
    pub fn stream(&self) -> Option<CaptureStream> {
        self.shared.inner.lock().stream.clone()
    }

    /// Routes captured segments to `sink` from now on
    pub fn set_segment_sink(&self, sink: Option<Arc<dyn SegmentSink>>) {
        self.shared.inner.lock().sink = sink;
    }

    /// Attaches a freshly acquired stream, entering `ready`
    pub fn attach_stream(&self, stream: CaptureStream) -> EngineResult<()> {
        self.ensure_alive()?;
        if stream.is_released() {
            return Err(RecorderError::StreamReleased.into());
        }

        let mut inner = self.shared.inner.lock();
        match inner.state() {
            RecordingState::Idle => {
                inner.session = Some(RecordingSession::new(stream.mode()));
            }
            RecordingState::Ready => {
                if let Some(session) = inner.session.as_mut() {
                    session.mode = stream.mode();
                }
            }
            state => {
                return Err(RecorderError::InvalidTransition {
                    action: "attach a stream",
                    state,
                }
                .into())
            }
        }
        tracing::debug!("Attached capture stream {}", stream.id());
        inner.stream = Some(stream);
        Ok(())
    }

    /// Selects a format and starts the countdown that precedes recording
    pub fn start(&self) -> EngineResult<()> {
        self.ensure_alive()?;
        let mut inner = self.shared.inner.lock();
        let state = inner.state();
        if state != RecordingState::Ready {
            return Err(RecorderError::InvalidTransition { action: "start", state }.into());
        }
        let stream = inner.stream.clone().ok_or(RecorderError::NoStream)?;
        if !stream.is_active() {
            return Err(RecorderError::StreamReleased.into());
        }

        let mime_type = select_mime_type(stream.mode(), self.shared.factory.as_ref())?;
        let generation = inner.generation;
        if let Some(session) = inner.session.as_mut() {
            session.mime_type = Some(mime_type);
            session.state = RecordingState::Countdown;
        }

        tracing::info!("Starting {} recording", stream.mode().as_str());
        inner.abort_countdown();
        inner.countdown = Some(self.spawn_countdown(generation, CountdownPurpose::Start));
        Ok(())
    }

    /// Pause recording
    pub fn pause(&self) -> EngineResult<()> {
        self.ensure_alive()?;
        let mut inner = self.shared.inner.lock();
        let state = inner.state();
        let scope = match (&inner.scope, state) {
            (Some(scope), RecordingState::Recording) => scope.clone(),
            _ => return Err(RecorderError::InvalidTransition { action: "pause", state }.into()),
        };

        scope.recorder.pause().map_err(|e| classify(&e, "pause-recorder"))?;

        tracing::info!("Pausing recording");
        inner.abort_ticker();
        if let Some(session) = inner.session.as_mut() {
            session.close_span();
            session.state = RecordingState::Paused;
        }
        drop(inner);

        self.emit(RecordingEvent::Paused);
        Ok(())
    }

    /// Resume recording; re-enters through the countdown
    pub fn resume(&self) -> EngineResult<()> {
        self.ensure_alive()?;
        let mut inner = self.shared.inner.lock();
        let state = inner.state();
        if state != RecordingState::Paused || inner.scope.is_none() {
            return Err(RecorderError::InvalidTransition { action: "resume", state }.into());
        }

        tracing::info!("Resuming recording");
        let generation = inner.generation;
        if let Some(session) = inner.session.as_mut() {
            session.state = RecordingState::Countdown;
        }
        inner.abort_countdown();
        inner.countdown = Some(self.spawn_countdown(generation, CountdownPurpose::Resume));
        Ok(())
    }

    /// Stop recording
    ///
    /// Requests the recorder stop right away and schedules release of the
    /// stream attached at this moment after the grace delay. The artifact is
    /// announced by [`RecordingEvent::Stopped`] once the recorder reports
    /// completion, or when the stop watchdog fires.
    pub fn done(&self) -> EngineResult<()> {
        self.ensure_alive()?;
        let mut inner = self.shared.inner.lock();
        let state = inner.state();

        let scope = match (state, inner.scope.clone()) {
            (RecordingState::Stopping | RecordingState::Stopped, _) => return Ok(()),
            (RecordingState::Countdown, None) => {
                inner.abort_countdown();
                if let Some(session) = inner.session.as_mut() {
                    session.state = RecordingState::Ready;
                    session.countdown = None;
                }
                drop(inner);
                tracing::info!("Countdown cancelled before recording started");
                self.emit(RecordingEvent::CountdownCancelled);
                return Ok(());
            }
            (RecordingState::Recording | RecordingState::Paused | RecordingState::Countdown, Some(scope)) => scope,
            (state, _) => return Err(RecorderError::InvalidTransition { action: "stop", state }.into()),
        };

        if scope.stop_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!("Stopping recording");
        inner.abort_countdown();
        inner.abort_ticker();
        let stream = inner.stream.clone();
        *scope.release_target.lock() = stream.clone();
        if let Some(session) = inner.session.as_mut() {
            session.close_span();
            session.countdown = None;
            session.state = RecordingState::Stopping;
        }
        drop(inner);

        self.emit(RecordingEvent::Stopping);
        self.request_recorder_stop(&scope, stream);
        Ok(())
    }

    /// Discards the session and returns to `idle`
    ///
    /// An active recorder is stopped through the regular stop path with
    /// finalization suppressed, so its hardware is still released twice over.
    pub fn reset(&self) {
        let (scope, stream) = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.abort_countdown();
            inner.abort_ticker();
            inner.session = None;
            (inner.scope.take(), inner.stream.take())
        };
        self.shared.cleanup.cancel_timers();

        match scope {
            Some(scope) => {
                scope.suppress_finalize.store(true, Ordering::SeqCst);
                if !scope.stop_requested.swap(true, Ordering::SeqCst) {
                    *scope.release_target.lock() = stream.clone();
                    self.request_recorder_stop(&scope, stream);
                }
            }
            None => {
                if let Some(stream) = stream {
                    self.shared.cleanup.release_stream(&stream, "session reset");
                }
            }
        }

        tracing::info!("Recording session reset");
        if self.shared.cleanup.owner().is_alive() {
            self.emit(RecordingEvent::Reset);
        }
    }

    /// Final teardown: blocks further mutation and sweeps hardware
    pub fn teardown(&self) {
        if !self.shared.cleanup.owner().mark_torn_down() {
            return;
        }

        let (scope, stream, pump) = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.abort_countdown();
            inner.abort_ticker();
            inner.sink = None;
            (inner.scope.take(), inner.stream.take(), inner.pump.take())
        };

        let mut streams: Vec<CaptureStream> = stream.into_iter().collect();
        if let Some(scope) = &scope {
            scope.suppress_finalize.store(true, Ordering::SeqCst);
            if !scope.stop_requested.swap(true, Ordering::SeqCst) {
                if let Err(e) = scope.recorder.stop() {
                    tracing::debug!("Recorder stop during teardown failed: {}", e);
                }
            }
            if let Some(target) = scope.release_target.lock().clone() {
                streams.push(target);
            }
        }

        let released = self.shared.cleanup.sweep(streams.iter(), "teardown");
        if let Some(pump) = pump {
            pump.abort();
        }
        tracing::info!("Recording state machine torn down ({} streams released)", released);
    }

    fn ensure_alive(&self) -> EngineResult<()> {
        if self.shared.cleanup.owner().is_alive() {
            Ok(())
        } else {
            Err(RecorderError::TornDown.into())
        }
    }

    fn emit(&self, event: RecordingEvent) {
        // No subscribers is fine
        let _ = self.shared.event_tx.send(event);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared.cleanup.owner().is_alive() && self.shared.inner.lock().generation == generation
    }

    fn spawn_countdown(&self, generation: u64, purpose: CountdownPurpose) -> JoinHandle<()> {
        let machine = self.clone();
        let seconds = self.shared.settings.countdown_secs;
        tokio::spawn(async move {
            for remaining in (1..=seconds).rev() {
                {
                    let mut inner = machine.shared.inner.lock();
                    if inner.generation != generation {
                        return;
                    }
                    if let Some(session) = inner.session.as_mut() {
                        session.countdown = Some(remaining);
                    }
                }
                machine.emit(RecordingEvent::CountdownTick(remaining));
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if !machine.is_current(generation) {
                return;
            }
            match purpose {
                CountdownPurpose::Start => machine.begin_recording(generation),
                CountdownPurpose::Resume => machine.resume_recorder(generation),
            }
        })
    }

    fn begin_recording(&self, generation: u64) {
        let (stream, mime_type) = {
            let inner = self.shared.inner.lock();
            let ready = inner.generation == generation && inner.state() == RecordingState::Countdown;
            let mime_type = inner.session.as_ref().and_then(|session| session.mime_type.clone());
            match (ready, inner.stream.clone(), mime_type) {
                (true, Some(stream), Some(mime_type)) => (stream, mime_type),
                _ => return,
            }
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let timeslice = Duration::from_millis(self.shared.settings.timeslice_ms);
        let started = self
            .shared
            .factory
            .create_recorder(&stream, &mime_type, event_tx)
            .and_then(|recorder| recorder.start(Some(timeslice)).map(|()| recorder));

        let recorder = match started {
            Ok(recorder) => recorder,
            Err(raw) => {
                self.fail_start(generation, &raw);
                return;
            }
        };

        let scope = Arc::new(RecorderScope::new(generation, recorder.clone()));
        {
            let mut inner = self.shared.inner.lock();
            let still_counting = inner.generation == generation && inner.state() == RecordingState::Countdown;
            if !still_counting || !self.shared.cleanup.owner().is_alive() {
                drop(inner);
                tracing::debug!("Countdown ended while the recorder was created, stopping it");
                scope.suppress_finalize.store(true, Ordering::SeqCst);
                scope.stop_requested.store(true, Ordering::SeqCst);
                if let Err(e) = recorder.stop() {
                    tracing::debug!("Stopping orphaned recorder failed: {}", e);
                }
                return;
            }
            inner.scope = Some(scope.clone());
            inner.countdown = None;
            if let Some(pump) = inner.pump.replace(self.spawn_pump(scope, event_rx)) {
                pump.abort();
            }
            if let Some(session) = inner.session.as_mut() {
                session.countdown = None;
                session.state = RecordingState::Recording;
                session.open_span();
            }
            inner.abort_ticker();
            inner.ticker = Some(self.spawn_ticker(generation));
        }

        tracing::info!("Recording started ({})", mime_type);
        self.emit(RecordingEvent::Started { mime_type });
    }

    fn fail_start(&self, generation: u64, raw: &RawError) {
        let error = classify(raw, "start-recorder");
        tracing::error!("Failed to start recorder: {}", error);
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation || inner.state() != RecordingState::Countdown {
                return;
            }
            inner.countdown = None;
            if let Some(session) = inner.session.as_mut() {
                session.countdown = None;
                session.state = RecordingState::Ready;
            }
        }
        self.emit(RecordingEvent::Error(error));
    }

    fn resume_recorder(&self, generation: u64) {
        let scope = {
            let inner = self.shared.inner.lock();
            if inner.generation != generation || inner.state() != RecordingState::Countdown {
                return;
            }
            match inner.scope.clone() {
                Some(scope) => scope,
                None => return,
            }
        };

        if let Err(raw) = scope.recorder.resume() {
            let error = classify(&raw, "resume-recorder");
            tracing::error!("Failed to resume recorder: {}", error);
            let mut inner = self.shared.inner.lock();
            if inner.generation == generation && inner.state() == RecordingState::Countdown {
                inner.countdown = None;
                if let Some(session) = inner.session.as_mut() {
                    session.countdown = None;
                    session.state = RecordingState::Paused;
                }
            }
            drop(inner);
            self.emit(RecordingEvent::Error(error));
            return;
        }

        {
            let mut inner = self.shared.inner.lock();
            // A stop that landed during resume owns the recorder now
            if inner.generation != generation || inner.state() != RecordingState::Countdown {
                return;
            }
            inner.countdown = None;
            if let Some(session) = inner.session.as_mut() {
                session.countdown = None;
                session.state = RecordingState::Recording;
                session.open_span();
            }
            inner.abort_ticker();
            inner.ticker = Some(self.spawn_ticker(generation));
        }
        self.emit(RecordingEvent::Resumed);
    }

    fn spawn_pump(&self, scope: Arc<RecorderScope>, mut events: RecorderEventStream) -> JoinHandle<()> {
        let machine = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    RecorderEvent::DataAvailable(data) => machine.on_data(&scope, data),
                    RecorderEvent::Stopped => machine.handle_stop(&scope, "recorder stopped"),
                    RecorderEvent::Error(raw) => machine.on_recorder_error(&scope, &raw),
                }
            }
        })
    }

    fn spawn_ticker(&self, generation: u64) -> JoinHandle<()> {
        let machine = self.clone();
        let limit = self.shared.settings.max_duration_secs.map(Duration::from_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let elapsed = {
                    let inner = machine.shared.inner.lock();
                    if inner.generation != generation || inner.state() != RecordingState::Recording {
                        return;
                    }
                    match &inner.session {
                        Some(session) => session.elapsed(),
                        None => return,
                    }
                };
                machine.emit(RecordingEvent::Progress(elapsed.as_millis() as u64));

                if limit.is_some_and(|limit| elapsed >= limit) {
                    tracing::info!("Maximum recording duration reached");
                    if let Err(e) = machine.done() {
                        tracing::warn!("Automatic stop failed: {}", e);
                    }
                    return;
                }
            }
        })
    }

    /// Assigns the next chunk index synchronously and forwards the segment
    fn on_data(&self, scope: &RecorderScope, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        if scope.suppress_finalize.load(Ordering::SeqCst) {
            return;
        }

        let size = data.len();
        let data = Arc::new(data);
        let (index, sink) = {
            let mut inner = self.shared.inner.lock();
            if inner.generation != scope.generation {
                return;
            }
            let sink = inner.sink.clone();
            match inner.session.as_mut() {
                Some(session) if session.state != RecordingState::Stopped => {
                    (session.push_segment(data.clone()), sink)
                }
                _ => return,
            }
        };

        tracing::debug!("Captured chunk {} ({} bytes)", index, size);
        self.emit(RecordingEvent::ChunkCaptured { index, size });
        if let Some(sink) = sink {
            sink.accept(index, data);
        }
    }

    fn on_recorder_error(&self, scope: &RecorderScope, raw: &RawError) {
        let error = classify(raw, "recorder");
        tracing::error!("Recorder error: {}", error);
        if scope.generation != self.shared.inner.lock().generation {
            return;
        }
        self.emit(RecordingEvent::Error(error));
        if !scope.stop_requested.load(Ordering::SeqCst) {
            if let Err(e) = self.done() {
                tracing::warn!("Could not stop after recorder error: {}", e);
            }
        }
    }

    fn request_recorder_stop(&self, scope: &Arc<RecorderScope>, stream: Option<CaptureStream>) {
        let grace = Duration::from_millis(self.shared.settings.stop_grace_ms);
        if let Some(stream) = stream {
            self.shared.cleanup.schedule_release(stream, grace, "stop grace elapsed");
        }

        if let Err(raw) = scope.recorder.stop() {
            tracing::warn!("Recorder stop request failed: {}", raw);
            self.handle_stop(scope, "stop request failed");
            return;
        }

        let machine = self.clone();
        let watchdog_scope = scope.clone();
        let timeout = Duration::from_millis(self.shared.settings.stop_timeout_ms);
        self.shared.cleanup.track_timer(
            "stop-watchdog",
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if !watchdog_scope.stop_handled.load(Ordering::SeqCst) {
                    tracing::warn!("Recorder did not report completion within {}ms", timeout.as_millis());
                }
                machine.handle_stop(&watchdog_scope, "stop watchdog");
            }),
        );
    }

    /// Runs the stop effects exactly once per recorder
    fn handle_stop(&self, scope: &RecorderScope, trigger: &str) {
        if scope.stop_handled.swap(true, Ordering::SeqCst) {
            tracing::debug!("Stop already handled, ignoring {}", trigger);
            return;
        }
        tracing::debug!("Handling recorder stop ({})", trigger);

        let target = scope.release_target.lock().clone();
        let target = match target {
            Some(stream) => Some(stream),
            None => {
                let inner = self.shared.inner.lock();
                if inner.generation == scope.generation {
                    inner.stream.clone()
                } else {
                    None
                }
            }
        };
        if let Some(stream) = &target {
            self.shared.cleanup.release_stream(stream, "recorder stopped");
        }

        if scope.suppress_finalize.load(Ordering::SeqCst) || !self.shared.cleanup.owner().is_alive() {
            return;
        }

        let artifact = {
            let mut inner = self.shared.inner.lock();
            if inner.generation != scope.generation {
                return;
            }
            inner.abort_countdown();
            inner.abort_ticker();
            inner.scope = None;
            let Some(session) = inner.session.as_mut() else {
                return;
            };
            let artifact = session.assemble();
            session.countdown = None;
            session.state = RecordingState::Stopped;
            artifact
        };

        tracing::info!(
            "Recording stopped. Duration: {}ms, {} chunks, {} bytes",
            artifact.duration_ms,
            artifact.chunk_count,
            artifact.size()
        );
        self.emit(RecordingEvent::Stopped(artifact));
    }
}
