//! In-process capture backend
//!
//! Hands out tracks that hold no real hardware. Used by the demo binary and
//! by tests that need to script permission failures or slow prompts.

use super::traits::{CaptureBackend, CaptureConstraints, DeviceInfo, DeviceKind, MediaTrack, TrackKind};
use crate::utils::error::RawError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Track backed by nothing but a liveness flag
#[derive(Debug)]
pub struct SyntheticTrack {
    id: String,
    kind: TrackKind,
    device_id: String,
    live: AtomicBool,
    stop_calls: AtomicU32,
}

impl SyntheticTrack {
    pub fn new(kind: TrackKind, device_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            device_id: device_id.into(),
            live: AtomicBool::new(true),
            stop_calls: AtomicU32::new(0),
        }
    }

    /// Number of times `stop` was called, including no-op calls
    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl MediaTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn device_id(&self) -> Option<String> {
        Some(self.device_id.clone())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&self) -> Result<(), RawError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct Script {
    failures: VecDeque<RawError>,
    delay: Option<Duration>,
    requests: Vec<CaptureConstraints>,
    tracks: Vec<Arc<SyntheticTrack>>,
}

/// Capture backend with a fixed device list and scriptable failures
pub struct SyntheticCaptureBackend {
    devices: Mutex<Vec<DeviceInfo>>,
    script: Mutex<Script>,
}

impl SyntheticCaptureBackend {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices: Mutex::new(devices),
            script: Mutex::new(Script::default()),
        }
    }

    /// One microphone and one camera
    pub fn with_default_devices() -> Self {
        Self::new(vec![
            DeviceInfo {
                id: "mic-builtin".to_string(),
                kind: DeviceKind::AudioInput,
                label: "Built-in Microphone".to_string(),
                group_id: "builtin".to_string(),
            },
            DeviceInfo {
                id: "cam-builtin".to_string(),
                kind: DeviceKind::VideoInput,
                label: "Built-in Camera".to_string(),
                group_id: "builtin".to_string(),
            },
        ])
    }

    pub fn add_device(&self, device: DeviceInfo) {
        self.devices.lock().push(device);
    }

    /// Makes the next request fail with `error`
    pub fn fail_next(&self, error: RawError) {
        self.script.lock().failures.push_back(error);
    }

    /// Delays every request, simulating a permission prompt left open
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.script.lock().delay = delay;
    }

    /// Constraints of every request received so far
    pub fn requests(&self) -> Vec<CaptureConstraints> {
        self.script.lock().requests.clone()
    }

    /// Every track handed out so far
    pub fn tracks(&self) -> Vec<Arc<SyntheticTrack>> {
        self.script.lock().tracks.clone()
    }

    pub fn live_track_count(&self) -> usize {
        self.script.lock().tracks.iter().filter(|track| track.is_live()).count()
    }

    fn first_device(&self, kind: DeviceKind) -> Option<String> {
        self.devices
            .lock()
            .iter()
            .find(|device| device.kind == kind)
            .map(|device| device.id.clone())
    }

    fn resolve(&self, kind: DeviceKind, requested: Option<&String>) -> Result<String, RawError> {
        match requested {
            Some(id) => {
                let known = self.devices.lock().iter().any(|device| &device.id == id);
                if known {
                    Ok(id.clone())
                } else {
                    Err(RawError::coded("OverconstrainedError", format!("device {id} not available")))
                }
            }
            None => self
                .first_device(kind)
                .ok_or_else(|| RawError::coded("NotFoundError", "Requested device not found")),
        }
    }
}

#[async_trait]
impl CaptureBackend for SyntheticCaptureBackend {
    async fn request_capture_device(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, RawError> {
        let (failure, delay) = {
            let mut script = self.script.lock();
            script.requests.push(constraints.clone());
            (script.failures.pop_front(), script.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let mut created = Vec::new();
        if let Some(audio) = &constraints.audio {
            let device = self.resolve(DeviceKind::AudioInput, audio.device_id.as_ref())?;
            created.push(Arc::new(SyntheticTrack::new(TrackKind::Audio, device)));
        }
        if let Some(video) = &constraints.video {
            let device = self.resolve(DeviceKind::VideoInput, video.device_id.as_ref())?;
            created.push(Arc::new(SyntheticTrack::new(TrackKind::Video, device)));
        }

        self.script.lock().tracks.extend(created.iter().cloned());
        Ok(created
            .into_iter()
            .map(|track| track as Arc<dyn MediaTrack>)
            .collect())
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, RawError> {
        Ok(self.devices.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureMode;

    #[tokio::test]
    async fn test_tracks_follow_constraints() {
        let backend = SyntheticCaptureBackend::with_default_devices();
        let tracks = backend
            .request_capture_device(&CaptureConstraints::for_mode(CaptureMode::Video))
            .await
            .unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].device_id().as_deref(), Some("cam-builtin"));
        assert_eq!(backend.live_track_count(), 2);

        tracks[0].stop().unwrap();
        tracks[0].stop().unwrap();
        assert_eq!(backend.live_track_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed_once() {
        let backend = SyntheticCaptureBackend::with_default_devices();
        backend.fail_next(RawError::coded("NotAllowedError", "denied"));
        let constraints = CaptureConstraints::for_mode(CaptureMode::Audio);

        let first = backend.request_capture_device(&constraints).await;
        assert_eq!(first.err().and_then(|e| e.code).as_deref(), Some("NotAllowedError"));
        assert!(backend.request_capture_device(&constraints).await.is_ok());
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_device_is_overconstrained() {
        let backend = SyntheticCaptureBackend::with_default_devices();
        let constraints =
            CaptureConstraints::for_mode(CaptureMode::Audio).with_device(DeviceKind::AudioInput, "missing");
        let error = backend.request_capture_device(&constraints).await.err().unwrap();
        assert_eq!(error.code.as_deref(), Some("OverconstrainedError"));
    }
}
