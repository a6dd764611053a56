//! Recording format selection

use super::platform::RecorderFactory;
use crate::capture::CaptureMode;
use crate::utils::error::{ClassifiedError, EngineResult};

/// Candidate formats for video sessions, most preferred first
pub const VIDEO_MIME_CANDIDATES: &[&str] = &[
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
    "video/mp4",
];

/// Candidate formats for audio-only sessions, most preferred first
pub const AUDIO_MIME_CANDIDATES: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
    "audio/mp4",
];

pub fn candidates(mode: CaptureMode) -> &'static [&'static str] {
    match mode {
        CaptureMode::Audio => AUDIO_MIME_CANDIDATES,
        CaptureMode::Video => VIDEO_MIME_CANDIDATES,
    }
}

/// Picks the first candidate the platform supports
pub fn select_mime_type(mode: CaptureMode, factory: &dyn RecorderFactory) -> EngineResult<String> {
    match candidates(mode).iter().find(|mime| factory.is_type_supported(mime)) {
        Some(mime) => {
            tracing::debug!("Selected recording format {}", mime);
            Ok((*mime).to_string())
        }
        None => Err(ClassifiedError::invalid_input(
            "select-mime-type",
            format!("This device cannot record {} in any supported format.", mode.as_str()),
        )),
    }
}

/// File extension for a mime type, ignoring codec parameters
pub fn extension_for(mime_type: &str) -> &'static str {
    let base = mime_type.split(';').next().unwrap_or(mime_type).trim();
    match base {
        "video/webm" | "audio/webm" => "webm",
        "video/mp4" => "mp4",
        "audio/mp4" => "m4a",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}
