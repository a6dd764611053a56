//! Recording engine
//!
//! Wires the capture controller, the recording state machine and the upload
//! pipeline together behind the command surface used by UI collaborators.
//! Every command failure is also stored as the engine's last error.

use crate::capture::{
    CaptureBackend, CaptureMode, DeviceKind, DeviceList, HardwareRegistry, MediaCaptureController,
};
use crate::cleanup::{CleanupCoordinator, OwnerGuard};
use crate::config::EngineConfig;
use crate::recorder::mime::extension_for;
use crate::recorder::{
    MachineSnapshot, RecordedArtifact, RecorderError, RecorderFactory, RecordingEvent, RecordingState,
    RecordingStateMachine, SegmentSink,
};
use crate::resilience::{classify, FallbackRouter, Route};
use crate::upload::pipeline::recording_path;
use crate::upload::{AuthCache, ChunkManifest, ChunkSummary, ChunkUploadPipeline, LocalStore, RemoteBackend};
use crate::utils::error::{ClassifiedError, EngineResult, ErrorKind, ErrorResponse, LastError, RawError};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// External collaborators the engine drives
#[derive(Clone)]
pub struct EngineDeps {
    pub capture: Arc<dyn CaptureBackend>,
    pub recorders: Arc<dyn RecorderFactory>,
    pub remote: Arc<dyn RemoteBackend>,
    pub local: Arc<dyn LocalStore>,
    pub registry: HardwareRegistry,
}

/// Where the final recording was stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub path: String,
    pub route: Route,
    pub size: u64,
    /// Remote attempts made; zero when the backend is disabled
    pub attempts: u32,
}

/// State exposed to UI collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    #[serde(flatten)]
    pub recording: MachineSnapshot,
    pub capture_mode: Option<CaptureMode>,
    pub capture_active: bool,
    pub is_loading: bool,
    pub is_uploading: bool,
    pub last_error: Option<ErrorResponse>,
    pub chunks: Option<ChunkSummary>,
    pub manifest: Option<ChunkManifest>,
}

/// One recording session's engine
///
/// Must be created inside a tokio runtime.
pub struct RecordingEngine {
    session_id: String,
    config: EngineConfig,
    controller: MediaCaptureController,
    machine: RecordingStateMachine,
    remote: Arc<dyn RemoteBackend>,
    local: Arc<dyn LocalStore>,
    auth: Arc<AuthCache>,
    router: FallbackRouter,
    pipeline: Mutex<Option<Arc<ChunkUploadPipeline>>>,
    manifest: Mutex<Option<ChunkManifest>>,
    last_error: LastError,
    uploading: AtomicBool,
    status_reporter: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl RecordingEngine {
    pub fn new(session_id: impl Into<String>, config: EngineConfig, deps: EngineDeps) -> Self {
        let session_id = session_id.into();
        let owner = OwnerGuard::new();
        let cleanup = CleanupCoordinator::new(owner.clone());
        let controller =
            MediaCaptureController::new(deps.capture, deps.registry, config.capture.clone(), owner);
        let machine = RecordingStateMachine::new(deps.recorders, config.recorder.clone(), cleanup);
        let router = FallbackRouter::new(config.flags.backend_enabled);

        let engine = Self {
            auth: Arc::new(AuthCache::new(deps.remote.clone())),
            session_id,
            config,
            controller,
            machine,
            remote: deps.remote,
            local: deps.local,
            router,
            pipeline: Mutex::new(None),
            manifest: Mutex::new(None),
            last_error: LastError::new(),
            uploading: AtomicBool::new(false),
            status_reporter: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        };
        if engine.config.flags.backend_enabled {
            *engine.status_reporter.lock() = Some(engine.spawn_status_reporter());
        }
        tracing::info!(
            "Recording engine ready for session {} (backend {}, chunk upload {})",
            engine.session_id,
            if engine.config.flags.backend_enabled { "enabled" } else { "disabled" },
            if engine.config.flags.chunk_upload_enabled { "enabled" } else { "disabled" }
        );
        engine
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn controller(&self) -> &MediaCaptureController {
        &self.controller
    }

    pub fn machine(&self) -> &RecordingStateMachine {
        &self.machine
    }

    pub fn pipeline(&self) -> Option<Arc<ChunkUploadPipeline>> {
        self.pipeline.lock().clone()
    }

    pub fn last_error(&self) -> Option<ClassifiedError> {
        self.last_error.get()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.machine.subscribe()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let pipeline = self.pipeline.lock().clone();
        EngineSnapshot {
            recording: self.machine.snapshot(),
            capture_mode: self.controller.mode(),
            capture_active: self.controller.current().is_some_and(|stream| stream.is_active()),
            is_loading: self.controller.is_loading(),
            is_uploading: self.uploading.load(Ordering::SeqCst),
            last_error: self.last_error.get().map(ErrorResponse::from),
            chunks: pipeline.map(|pipeline| pipeline.summary()),
            manifest: self.manifest.lock().clone(),
        }
    }

    pub async fn acquire_audio(&self) -> EngineResult<()> {
        self.acquire(CaptureMode::Audio).await
    }

    pub async fn acquire_video(&self) -> EngineResult<()> {
        self.acquire(CaptureMode::Video).await
    }

    async fn acquire(&self, mode: CaptureMode) -> EngineResult<()> {
        let result: EngineResult<()> = async {
            self.ensure_capture_changeable("acquire a device")?;
            self.controller
                .acquire_with(mode, |stream| self.machine.attach_stream(stream.clone()))
                .await?;
            Ok(())
        }
        .await;
        self.track(result)
    }

    /// Switches an input device; only allowed before recording starts
    pub async fn switch_device(&self, device_id: &str) -> EngineResult<()> {
        let result: EngineResult<()> = async {
            self.ensure_capture_changeable("switch devices")?;
            self.controller
                .switch_device_with(device_id, |stream| self.machine.attach_stream(stream.clone()))
                .await?;
            Ok(())
        }
        .await;
        self.track(result)
    }

    pub async fn list_devices(&self, kind: DeviceKind) -> EngineResult<DeviceList> {
        let result = self.controller.list_devices(kind).await;
        self.track(result)
    }

    /// Starts the countdown and, when enabled, the progressive chunk upload
    pub fn start(&self) -> EngineResult<()> {
        let result = self
            .ensure_capture_settled("start")
            .and_then(|()| self.machine.start())
            .map(|()| self.install_pipeline());
        self.track(result)
    }

    pub fn pause(&self) -> EngineResult<()> {
        let result = self.machine.pause();
        self.track(result)
    }

    pub fn resume(&self) -> EngineResult<()> {
        let result = self.machine.resume();
        self.track(result)
    }

    /// Stops recording and waits for the assembled artifact
    ///
    /// Pending chunk uploads are finalized before returning; the manifest is
    /// available from [`snapshot`](Self::snapshot).
    pub async fn done(&self) -> EngineResult<Arc<RecordedArtifact>> {
        let result = self.finish().await;
        self.track(result)
    }

    async fn finish(&self) -> EngineResult<Arc<RecordedArtifact>> {
        let mut events = self.machine.subscribe();
        self.machine.done()?;

        let artifact = match self.machine.artifact() {
            Some(artifact) => artifact,
            None => self.wait_for_artifact(&mut events).await?,
        };

        self.controller.clear();

        let pipeline = self.pipeline.lock().clone();
        if let Some(pipeline) = pipeline {
            let manifest = pipeline.finalize().await;
            *self.manifest.lock() = Some(manifest);
        }
        Ok(artifact)
    }

    async fn wait_for_artifact(
        &self,
        events: &mut broadcast::Receiver<RecordingEvent>,
    ) -> EngineResult<Arc<RecordedArtifact>> {
        let ceiling = self.config.recorder.artifact_wait();

        let waited = tokio::time::timeout(ceiling, async {
            loop {
                match events.recv().await {
                    Ok(RecordingEvent::Stopped(artifact)) => return Ok(artifact),
                    Ok(RecordingEvent::Reset) | Ok(RecordingEvent::CountdownCancelled) => {
                        return Err(ClassifiedError::invalid_input(
                            "done",
                            "The recording ended before anything was captured.",
                        ))
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Event listener lagged by {} events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(RecorderError::TornDown.into());
                    }
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(ClassifiedError::new(
                ErrorKind::Timeout,
                "Finishing the recording took too long. Please try again.",
                true,
                "done",
                RawError::coded("TimeoutError", format!("no artifact within {}ms", ceiling.as_millis())),
            )),
        }
    }

    /// Discards the session ("start over")
    pub fn reset(&self) {
        self.machine.reset();
        self.controller.clear();
        if let Some(pipeline) = self.pipeline.lock().take() {
            pipeline.reset();
        }
        self.manifest.lock().take();
        self.last_error.clear();
    }

    /// Resets and deletes every chunk already stored for this session
    pub async fn cancel(&self) {
        let pipeline = self.pipeline.lock().take();
        self.machine.reset();
        self.controller.clear();
        self.manifest.lock().take();
        self.last_error.clear();

        if let Some(pipeline) = pipeline {
            pipeline.cleanup().await;
        }
        if self.router.backend_enabled() {
            report_status(self.remote.as_ref(), &self.session_id, "cancelled", json!({})).await;
        }
    }

    /// Uploads the assembled artifact, falling back to local storage
    pub async fn upload_recording(&self) -> EngineResult<UploadReceipt> {
        if self.uploading.swap(true, Ordering::SeqCst) {
            return self.track(Err(ClassifiedError::invalid_input(
                "upload-recording",
                "An upload is already in progress.",
            )));
        }
        let result = self.store_artifact().await;
        self.uploading.store(false, Ordering::SeqCst);
        self.track(result)
    }

    async fn store_artifact(&self) -> EngineResult<UploadReceipt> {
        let artifact = self.machine.artifact().ok_or_else(|| {
            ClassifiedError::invalid_input("upload-recording", "There is no finished recording to upload.")
        })?;
        let path = recording_path(
            &self.config.upload.path_prefix,
            &self.session_id,
            extension_for(&artifact.mime_type),
        );
        let path_ref = path.as_str();
        let data = artifact.data.as_slice();
        let content_type = artifact.mime_type.as_str();

        let routed = self
            .router
            .run(
                "upload-recording",
                &self.config.retry,
                |_attempt| async move {
                    self.auth.ensure().await?;
                    self.remote
                        .upload_blob(path_ref, data, content_type)
                        .await
                        .map(|ack| ack.path)
                },
                || async move { self.local.save(path_ref, data).await },
            )
            .await?;

        let receipt = UploadReceipt {
            path: routed.value,
            route: routed.route,
            size: artifact.size() as u64,
            attempts: routed.primary.as_ref().map(|record| record.attempts).unwrap_or(0),
        };
        tracing::info!("Recording stored via {:?} at {}", receipt.route, receipt.path);

        if self.router.backend_enabled() {
            report_status(
                self.remote.as_ref(),
                &self.session_id,
                "uploaded",
                json!({
                    "path": receipt.path,
                    "route": receipt.route,
                    "size": receipt.size,
                }),
            )
            .await;
        }
        Ok(receipt)
    }

    /// Tears the session down; later commands fail and late results are dropped
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.machine.teardown();
        self.controller.clear();
        if let Some(reporter) = self.status_reporter.lock().take() {
            reporter.abort();
        }
        if let Some(pipeline) = self.pipeline.lock().take() {
            pipeline.reset();
        }

        let leaked = self.controller.registry().report_leaks();
        if leaked > 0 {
            tracing::warn!("{} capture streams still live after shutdown", leaked);
        }
        tracing::info!("Recording engine for session {} shut down", self.session_id);
    }

    fn ensure_capture_changeable(&self, action: &'static str) -> EngineResult<()> {
        match self.machine.state() {
            RecordingState::Idle | RecordingState::Ready => Ok(()),
            state => Err(RecorderError::InvalidTransition { action, state }.into()),
        }
    }

    /// Rejects commands that need the current stream while a device request
    /// may still replace it
    fn ensure_capture_settled(&self, context: &str) -> EngineResult<()> {
        if !self.controller.is_loading() {
            return Ok(());
        }
        Err(ClassifiedError::new(
            ErrorKind::InvalidInput,
            "Wait for the device request to finish before recording.",
            true,
            context,
            RawError::coded("engine/busy", "capture request outstanding"),
        ))
    }

    fn install_pipeline(&self) {
        if !self.config.flags.chunk_upload_enabled {
            return;
        }
        let mime_type = self.machine.snapshot().mime_type.unwrap_or_default();
        let pipeline = ChunkUploadPipeline::new(
            self.session_id.clone(),
            self.config.upload.path_prefix.clone(),
            mime_type,
            self.remote.clone(),
            self.local.clone(),
            self.auth.clone(),
            self.router.clone(),
            self.config.retry.clone(),
        );
        let sink: Arc<dyn SegmentSink> = pipeline.clone();
        self.machine.set_segment_sink(Some(sink));
        if let Some(previous) = self.pipeline.lock().replace(pipeline) {
            previous.reset();
        }
    }

    fn track<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(error) = &result {
            tracing::debug!("Command failed: {}", error);
            self.last_error.record(error);
        }
        result
    }

    fn spawn_status_reporter(&self) -> JoinHandle<()> {
        let mut events = self.machine.subscribe();
        let remote = self.remote.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let (status, fields) = match event {
                    RecordingEvent::Started { mime_type } => ("recording", json!({ "mimeType": mime_type })),
                    RecordingEvent::Resumed => ("recording", json!({})),
                    RecordingEvent::Paused => ("paused", json!({})),
                    RecordingEvent::Stopping => ("processing", json!({})),
                    RecordingEvent::Stopped(artifact) => (
                        "recorded",
                        json!({
                            "mimeType": artifact.mime_type,
                            "durationMs": artifact.duration_ms,
                            "chunkCount": artifact.chunk_count,
                            "size": artifact.size(),
                        }),
                    ),
                    _ => continue,
                };
                report_status(remote.as_ref(), &session_id, status, fields).await;
            }
        })
    }
}

impl Drop for RecordingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sends a status ping; failures are logged and swallowed
async fn report_status(remote: &dyn RemoteBackend, session_id: &str, status: &str, mut fields: serde_json::Value) {
    if let Some(map) = fields.as_object_mut() {
        map.insert("status".to_string(), json!(status));
        map.insert("updatedAt".to_string(), json!(chrono::Utc::now().to_rfc3339()));
    }
    if let Err(raw) = remote.update_session_status(session_id, &fields).await {
        let error = classify(&raw, "status-update");
        tracing::warn!("Status update '{}' failed: {}", status, error);
    }
}
