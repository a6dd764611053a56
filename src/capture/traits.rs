//! Capture trait definitions
//!
//! Platform-agnostic traits for capture sources.

use crate::utils::error::RawError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a session records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Microphone only
    Audio,
    /// Camera plus microphone
    Video,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Audio => "audio",
            CaptureMode::Video => "video",
        }
    }
}

/// Kind of a single hardware track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Kind of an enumerated media device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
    AudioOutput,
}

/// Information about a media device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID
    pub id: String,

    pub kind: DeviceKind,

    /// Human-readable label (empty until permission is granted on some platforms)
    pub label: String,

    /// Physical device group; aliases share the group of the device they point to
    pub group_id: String,
}

/// Video constraints for a capture request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    pub device_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            device_id: None,
            width: 1280,
            height: 720,
            frame_rate: 30,
        }
    }
}

/// Audio constraints for a capture request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConstraints {
    pub device_id: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            device_id: None,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Capture request passed to [`CaptureBackend::request_capture_device`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    pub audio: Option<AudioConstraints>,
    pub video: Option<VideoConstraints>,
}

impl CaptureConstraints {
    /// Default constraints for a capture mode
    pub fn for_mode(mode: CaptureMode) -> Self {
        match mode {
            CaptureMode::Audio => Self {
                audio: Some(AudioConstraints::default()),
                video: None,
            },
            CaptureMode::Video => Self {
                audio: Some(AudioConstraints::default()),
                video: Some(VideoConstraints::default()),
            },
        }
    }

    /// Pins the device used for tracks of `kind`
    pub fn with_device(mut self, kind: DeviceKind, device_id: impl Into<String>) -> Self {
        let device_id = Some(device_id.into());
        match kind {
            DeviceKind::AudioInput => {
                self.audio.get_or_insert_with(AudioConstraints::default).device_id = device_id;
            }
            DeviceKind::VideoInput => {
                self.video.get_or_insert_with(VideoConstraints::default).device_id = device_id;
            }
            DeviceKind::AudioOutput => {}
        }
        self
    }
}

/// A live hardware track handed out by a capture backend
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Device the track reads from, if known
    fn device_id(&self) -> Option<String>;

    /// Whether the track still holds the hardware
    fn is_live(&self) -> bool;

    /// Stops the track. Stopping an ended track must be a no-op.
    fn stop(&self) -> Result<(), RawError>;
}

/// Platform capture source
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Requests hardware access. May prompt the user.
    ///
    /// Failures carry platform error names (`NotAllowedError`,
    /// `NotFoundError`, `NotReadableError`, `OverconstrainedError`,
    /// `SecurityError`) as their code.
    async fn request_capture_device(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, RawError>;

    /// Lists all media devices visible to the platform
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, RawError>;
}
