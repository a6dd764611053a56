//! Media capture controller
//!
//! Acquires, switches and releases the session's current [`CaptureStream`].
//! A replacement stream is always acquired before the old one is released, so
//! a failed acquisition never costs the user a working stream.

use super::devices::{prepare_device_list, DeviceList, DevicePreferences};
use super::registry::HardwareRegistry;
use super::stream::CaptureStream;
use super::traits::{CaptureBackend, CaptureConstraints, CaptureMode, DeviceKind, TrackKind};
use crate::cleanup::OwnerGuard;
use crate::config::CaptureSettings;
use crate::resilience::{classify, classify_capture_error};
use crate::utils::error::{ClassifiedError, EngineResult, ErrorKind, RawError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ControllerState {
    current: Option<CaptureStream>,
    mode: Option<CaptureMode>,
    loading: bool,
    preferences: DevicePreferences,
}

/// Clears the loading flag when the acquisition finishes, whatever the outcome
struct LoadingGuard<'a> {
    state: &'a Mutex<ControllerState>,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().loading = false;
    }
}

/// Owns the session's current capture stream
pub struct MediaCaptureController {
    backend: Arc<dyn CaptureBackend>,
    registry: HardwareRegistry,
    settings: CaptureSettings,
    owner: OwnerGuard,
    state: Mutex<ControllerState>,
}

impl MediaCaptureController {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        registry: HardwareRegistry,
        settings: CaptureSettings,
        owner: OwnerGuard,
    ) -> Self {
        Self {
            backend,
            registry,
            settings,
            owner,
            state: Mutex::new(ControllerState::default()),
        }
    }

    pub fn registry(&self) -> &HardwareRegistry {
        &self.registry
    }

    pub fn current(&self) -> Option<CaptureStream> {
        self.state.lock().current.clone()
    }

    pub fn mode(&self) -> Option<CaptureMode> {
        self.state.lock().mode
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn preferences(&self) -> DevicePreferences {
        self.state.lock().preferences.clone()
    }

    pub fn set_preferences(&self, preferences: DevicePreferences) {
        self.state.lock().preferences = preferences;
    }

    /// Acquires a stream for `mode` and makes it current
    ///
    /// Any previous stream is released only after the new one is live.
    pub async fn acquire(&self, mode: CaptureMode) -> EngineResult<CaptureStream> {
        self.acquire_with(mode, |_| Ok(())).await
    }

    /// Like [`acquire`](Self::acquire), but `accept` must take the new stream
    /// before it becomes current. A rejected stream is released and the
    /// previous one stays current and live.
    pub async fn acquire_with<F>(&self, mode: CaptureMode, accept: F) -> EngineResult<CaptureStream>
    where
        F: FnOnce(&CaptureStream) -> EngineResult<()>,
    {
        let context = format!("acquire-{}", mode.as_str());
        let _loading = self.begin_loading(&context)?;

        let mut constraints = CaptureConstraints::for_mode(mode);
        {
            let state = self.state.lock();
            if let Some(id) = state.preferences.get(DeviceKind::AudioInput) {
                constraints = constraints.with_device(DeviceKind::AudioInput, id);
            }
            if mode == CaptureMode::Video {
                if let Some(id) = state.preferences.get(DeviceKind::VideoInput) {
                    constraints = constraints.with_device(DeviceKind::VideoInput, id);
                }
            }
        }

        tracing::info!("Requesting {} capture", mode.as_str());
        let stream = self.request(mode, &constraints, &context).await?;
        self.commit(&stream, mode, None, accept, &context)?;
        Ok(stream)
    }

    /// Switches one input of the current stream to `device_id`
    ///
    /// On failure the previous stream stays current and live.
    pub async fn switch_device(&self, device_id: &str) -> EngineResult<CaptureStream> {
        self.switch_device_with(device_id, |_| Ok(())).await
    }

    /// Like [`switch_device`](Self::switch_device), gated by `accept` the
    /// same way as [`acquire_with`](Self::acquire_with)
    pub async fn switch_device_with<F>(&self, device_id: &str, accept: F) -> EngineResult<CaptureStream>
    where
        F: FnOnce(&CaptureStream) -> EngineResult<()>,
    {
        let context = "switch-device";
        let _loading = self.begin_loading(context)?;

        let (mode, current) = {
            let state = self.state.lock();
            (state.mode, state.current.clone())
        };
        let (Some(mode), Some(current)) = (mode, current) else {
            return Err(ClassifiedError::invalid_input(
                context,
                "There is no active capture to switch devices on.",
            ));
        };

        let devices = self
            .backend
            .enumerate_devices()
            .await
            .map_err(|e| classify(&e, context))?;
        let Some(device) = devices.iter().find(|device| device.id == device_id) else {
            return Err(classify_capture_error(
                &RawError::coded("NotFoundError", format!("device {device_id} is not connected")),
                mode,
                context,
            ));
        };

        let kind = device.kind;
        let supported = match kind {
            DeviceKind::AudioInput => true,
            DeviceKind::VideoInput => mode == CaptureMode::Video,
            DeviceKind::AudioOutput => false,
        };
        if !supported {
            return Err(ClassifiedError::invalid_input(
                context,
                format!("Device \"{}\" cannot be used for {} capture.", device.label, mode.as_str()),
            ));
        }

        let mut constraints = CaptureConstraints::for_mode(mode);
        if let Some(id) = current.device_id(TrackKind::Audio) {
            constraints = constraints.with_device(DeviceKind::AudioInput, id);
        }
        if let Some(id) = current.device_id(TrackKind::Video) {
            constraints = constraints.with_device(DeviceKind::VideoInput, id);
        }
        constraints = constraints.with_device(kind, device_id);

        tracing::info!("Switching {:?} to device {}", kind, device_id);
        let stream = self.request(mode, &constraints, context).await?;
        self.commit(&stream, mode, Some(&current), accept, context)?;
        self.state.lock().preferences.set(kind, device_id);
        Ok(stream)
    }

    /// Lists input devices of `kind` with the preferred one selected
    pub async fn list_devices(&self, kind: DeviceKind) -> EngineResult<DeviceList> {
        let raw = self
            .backend
            .enumerate_devices()
            .await
            .map_err(|e| classify(&e, "enumerate-devices"))?;
        let preferences = self.preferences();
        Ok(prepare_device_list(raw, kind, preferences.get(kind)))
    }

    /// Releases `stream`; clears it as current when it is the current one
    pub fn release(&self, stream: &CaptureStream) {
        {
            let mut state = self.state.lock();
            if state.current.as_ref().is_some_and(|current| current.same_as(stream)) {
                state.current = None;
                state.mode = None;
            }
        }
        stream.release("released by caller");
    }

    /// Releases the current stream, if any, and forgets the capture mode
    pub fn clear(&self) {
        let previous = {
            let mut state = self.state.lock();
            state.mode = None;
            state.current.take()
        };
        if let Some(stream) = previous {
            stream.release("capture cleared");
        }
    }

    fn begin_loading(&self, context: &str) -> EngineResult<LoadingGuard<'_>> {
        let mut state = self.state.lock();
        if state.loading {
            return Err(ClassifiedError::new(
                ErrorKind::InvalidInput,
                "A device request is already in progress.",
                true,
                context,
                RawError::coded("engine/busy", "capture request already outstanding"),
            ));
        }
        state.loading = true;
        Ok(LoadingGuard { state: &self.state })
    }

    async fn request(
        &self,
        mode: CaptureMode,
        constraints: &CaptureConstraints,
        context: &str,
    ) -> EngineResult<CaptureStream> {
        let ceiling = Duration::from_millis(self.settings.permission_timeout_ms);
        let tracks = match tokio::time::timeout(ceiling, self.backend.request_capture_device(constraints)).await {
            Ok(Ok(tracks)) => tracks,
            Ok(Err(raw)) => {
                let error = classify_capture_error(&raw, mode, context);
                tracing::warn!("{} failed: {}", context, error);
                return Err(error);
            }
            Err(_) => {
                let raw = RawError::coded(
                    "TimeoutError",
                    format!("no response within {}ms", self.settings.permission_timeout_ms),
                );
                let error = classify_capture_error(&raw, mode, context);
                tracing::warn!("{} timed out", context);
                return Err(error);
            }
        };

        if tracks.is_empty() {
            return Err(classify_capture_error(
                &RawError::coded("NotFoundError", "backend returned no tracks"),
                mode,
                context,
            ));
        }

        let stream = CaptureStream::new(mode, tracks, self.registry.clone());
        if !self.owner.is_alive() {
            stream.release("owner torn down during acquisition");
            return Err(ClassifiedError::new(
                ErrorKind::Unknown,
                "The recording session was closed.",
                false,
                context,
                RawError::coded("engine/torn-down", "owner torn down"),
            ));
        }
        Ok(stream)
    }

    /// Makes `stream` current once `accept` takes it
    ///
    /// `replaces` is the stream a switch was based on; if another stream
    /// became current meanwhile the switch is stale. The previous stream is
    /// released only after the new one is in place.
    fn commit<F>(
        &self,
        stream: &CaptureStream,
        mode: CaptureMode,
        replaces: Option<&CaptureStream>,
        accept: F,
        context: &str,
    ) -> EngineResult<()>
    where
        F: FnOnce(&CaptureStream) -> EngineResult<()>,
    {
        let previous = {
            let mut state = self.state.lock();
            if let Some(expected) = replaces {
                let still_current = state
                    .current
                    .as_ref()
                    .is_some_and(|active| active.same_as(expected));
                if !still_current {
                    drop(state);
                    stream.release("capture changed during device switch");
                    return Err(ClassifiedError::new(
                        ErrorKind::InvalidInput,
                        "Capture was stopped while switching devices.",
                        false,
                        context,
                        RawError::coded("engine/stale-switch", "current stream changed"),
                    ));
                }
            }
            if let Err(e) = accept(stream) {
                drop(state);
                tracing::warn!("{}: new stream rejected, keeping the previous one: {}", context, e);
                stream.release("rejected by recorder");
                return Err(e);
            }
            state.mode = Some(mode);
            state.current.replace(stream.clone())
        };
        if let Some(previous) = previous {
            if !previous.same_as(stream) {
                previous.release("superseded");
            }
        }
        Ok(())
    }
}
