//! Recording system module
//!
//! This module implements the recording lifecycle:
//! - PlatformRecorder/RecorderFactory traits for the platform encoder
//! - RecordingStateMachine to drive one recorder per session
//! - Session state and the assembled artifact

pub mod coordinator;
pub mod mime;
pub mod platform;
pub mod state;
pub mod synthetic;

pub use coordinator::{RecorderError, RecordingEvent, RecordingStateMachine, SegmentSink};
pub use platform::{PlatformRecorder, RecorderEvent, RecorderEventSink, RecorderFactory};
pub use state::{ArtifactRef, MachineSnapshot, RecordedArtifact, RecordingSession, RecordingState};
