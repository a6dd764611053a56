//! Recording state management
//!
//! Defines the recording lifecycle states and the data owned by one
//! recording session.

use crate::capture::CaptureMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Current state of the recording system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No capture attached
    #[default]
    Idle,
    /// Capture attached, waiting for start
    Ready,
    /// Counting down before recording starts or resumes
    Countdown,
    /// Currently recording
    Recording,
    /// Recording is paused
    Paused,
    /// Stop requested, waiting for the recorder to flush
    Stopping,
    /// Artifact assembled
    Stopped,
}

impl RecordingState {
    /// States in which a platform recorder may exist
    pub fn has_recorder(&self) -> bool {
        matches!(
            self,
            RecordingState::Countdown | RecordingState::Recording | RecordingState::Paused | RecordingState::Stopping
        )
    }
}

/// One uninterrupted stretch of recording
///
/// A new span is opened each time recording starts or resumes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSpan {
    /// Span index (0, 1, 2, ...)
    pub index: usize,

    #[serde(skip)]
    started_at: Instant,

    #[serde(skip)]
    ended_at: Option<Instant>,

    /// Unix timestamp when the span started
    pub unix_start_ms: i64,

    /// Unix timestamp when the span ended
    pub unix_end_ms: Option<i64>,
}

impl RecordingSpan {
    /// Create a new span starting now
    pub fn new(index: usize) -> Self {
        Self {
            index,
            started_at: Instant::now(),
            ended_at: None,
            unix_start_ms: Utc::now().timestamp_millis(),
            unix_end_ms: None,
        }
    }

    /// End the span. Ending twice keeps the first end time.
    pub fn end(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Instant::now());
            self.unix_end_ms = Some(Utc::now().timestamp_millis());
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn duration(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Instant::now);
        end.saturating_duration_since(self.started_at)
    }
}

/// Final output of a recording session
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedArtifact {
    pub id: Uuid,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub duration_ms: u64,
    pub chunk_count: u32,
    pub created_at: DateTime<Utc>,
}

impl RecordedArtifact {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn reference(&self) -> ArtifactRef {
        ArtifactRef {
            id: self.id,
            mime_type: self.mime_type.clone(),
            size: self.data.len() as u64,
            duration_ms: self.duration_ms,
            chunk_count: self.chunk_count,
            created_at: self.created_at,
        }
    }
}

/// Serializable description of a [`RecordedArtifact`] without its bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub id: Uuid,
    pub mime_type: String,
    pub size: u64,
    pub duration_ms: u64,
    pub chunk_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Data owned by one recording attempt
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub id: Uuid,
    pub mode: CaptureMode,
    pub state: RecordingState,
    pub mime_type: Option<String>,
    pub countdown: Option<u32>,
    spans: Vec<RecordingSpan>,
    segments: Vec<Arc<Vec<u8>>>,
    artifact: Option<Arc<RecordedArtifact>>,
}

impl RecordingSession {
    pub fn new(mode: CaptureMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            state: RecordingState::Ready,
            mime_type: None,
            countdown: None,
            spans: Vec::new(),
            segments: Vec::new(),
            artifact: None,
        }
    }

    pub fn open_span(&mut self) {
        if self.spans.last().is_some_and(RecordingSpan::is_open) {
            return;
        }
        let index = self.spans.len();
        self.spans.push(RecordingSpan::new(index));
    }

    pub fn close_span(&mut self) {
        if let Some(span) = self.spans.last_mut() {
            span.end();
        }
    }

    pub fn spans(&self) -> &[RecordingSpan] {
        &self.spans
    }

    /// Recorded time, excluding pauses
    pub fn elapsed(&self) -> Duration {
        self.spans.iter().map(RecordingSpan::duration).sum()
    }

    /// Appends a segment and returns its chunk index
    ///
    /// The segment is shared with the upload path, not copied.
    pub fn push_segment(&mut self, data: Arc<Vec<u8>>) -> u32 {
        let index = self.segments.len() as u32;
        self.segments.push(data);
        index
    }

    pub fn chunk_count(&self) -> u32 {
        self.segments.len() as u32
    }

    pub fn recorded_bytes(&self) -> u64 {
        self.segments.iter().map(|segment| segment.len() as u64).sum()
    }

    pub fn artifact(&self) -> Option<&Arc<RecordedArtifact>> {
        self.artifact.as_ref()
    }

    fn concat_segments(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.recorded_bytes() as usize);
        for segment in &self.segments {
            data.extend_from_slice(segment);
        }
        data
    }

    /// Concatenates the segments into the final artifact and stores it
    pub fn assemble(&mut self) -> Arc<RecordedArtifact> {
        self.close_span();
        let artifact = Arc::new(RecordedArtifact {
            id: Uuid::new_v4(),
            mime_type: self.mime_type.clone().unwrap_or_default(),
            data: self.concat_segments(),
            duration_ms: self.elapsed().as_millis() as u64,
            chunk_count: self.chunk_count(),
            created_at: Utc::now(),
        });
        self.artifact = Some(artifact.clone());
        artifact
    }
}

/// Point-in-time view of the state machine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSnapshot {
    pub session_id: Option<Uuid>,
    pub mode: Option<CaptureMode>,
    pub state: RecordingState,
    pub is_recording: bool,
    pub is_paused: bool,
    pub elapsed_ms: u64,
    pub countdown: Option<u32>,
    pub mime_type: Option<String>,
    pub chunk_count: u32,
    pub artifact: Option<ArtifactRef>,
}

impl MachineSnapshot {
    pub fn idle() -> Self {
        Self {
            session_id: None,
            mode: None,
            state: RecordingState::Idle,
            is_recording: false,
            is_paused: false,
            elapsed_ms: 0,
            countdown: None,
            mime_type: None,
            chunk_count: 0,
            artifact: None,
        }
    }
}

impl From<&RecordingSession> for MachineSnapshot {
    fn from(session: &RecordingSession) -> Self {
        Self {
            session_id: Some(session.id),
            mode: Some(session.mode),
            state: session.state,
            is_recording: session.state == RecordingState::Recording,
            is_paused: session.state == RecordingState::Paused,
            elapsed_ms: session.elapsed().as_millis() as u64,
            countdown: session.countdown,
            mime_type: session.mime_type.clone(),
            chunk_count: session.chunk_count(),
            artifact: session.artifact().map(|artifact| artifact.reference()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_excludes_pauses() {
        let mut session = RecordingSession::new(CaptureMode::Audio);
        session.open_span();
        tokio::time::sleep(Duration::from_secs(2)).await;
        session.close_span();
        tokio::time::sleep(Duration::from_secs(5)).await;
        session.open_span();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(session.elapsed(), Duration::from_secs(3));
        assert_eq!(session.spans().len(), 2);
    }

    #[test]
    fn test_segments_get_sequential_indices() {
        let mut session = RecordingSession::new(CaptureMode::Video);
        assert_eq!(session.push_segment(Arc::new(vec![1])), 0);
        assert_eq!(session.push_segment(Arc::new(vec![2, 3])), 1);
        assert_eq!(session.chunk_count(), 2);
        assert_eq!(session.recorded_bytes(), 3);
    }

    #[test]
    fn test_segments_are_shared_not_copied() {
        let mut session = RecordingSession::new(CaptureMode::Audio);
        let segment = Arc::new(vec![7u8; 1024]);
        session.push_segment(segment.clone());
        assert_eq!(Arc::strong_count(&segment), 2);
    }

    #[tokio::test]
    async fn test_assemble_concatenates_in_order() {
        let mut session = RecordingSession::new(CaptureMode::Audio);
        session.mime_type = Some("audio/webm".to_string());
        session.push_segment(Arc::new(b"ab".to_vec()));
        session.push_segment(Arc::new(b"cd".to_vec()));

        let artifact = session.assemble();
        assert_eq!(artifact.data, b"abcd");
        assert_eq!(artifact.chunk_count, 2);
        assert_eq!(artifact.reference().size, 4);
        assert!(session.artifact().is_some());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&RecordingState::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }
}
