//! Platform recorder abstraction
//!
//! A platform recorder turns a [`CaptureStream`] into encoded media segments.
//! Its callbacks are delivered as [`RecorderEvent`]s over an unbounded channel
//! that the state machine subscribes to once per recording.

use crate::capture::CaptureStream;
use crate::utils::error::RawError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Callback delivered by a platform recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// An encoded segment became available. May be empty.
    DataAvailable(Vec<u8>),
    /// The recorder finished flushing after a stop request.
    /// Some platforms report this more than once.
    Stopped,
    /// The recorder failed and will not produce more data
    Error(RawError),
}

pub type RecorderEventSink = mpsc::UnboundedSender<RecorderEvent>;
pub type RecorderEventStream = mpsc::UnboundedReceiver<RecorderEvent>;

/// Handle over one running platform recorder
///
/// All calls are requests; completion is reported through events.
pub trait PlatformRecorder: Send + Sync {
    /// Starts recording, emitting a segment every `timeslice` when given
    fn start(&self, timeslice: Option<Duration>) -> Result<(), RawError>;

    fn pause(&self) -> Result<(), RawError>;

    fn resume(&self) -> Result<(), RawError>;

    /// Requests a stop. The final segment and [`RecorderEvent::Stopped`]
    /// follow asynchronously.
    fn stop(&self) -> Result<(), RawError>;
}

/// Creates platform recorders
pub trait RecorderFactory: Send + Sync {
    /// Whether the platform can encode `mime_type`
    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn create_recorder(
        &self,
        stream: &CaptureStream,
        mime_type: &str,
        events: RecorderEventSink,
    ) -> Result<Arc<dyn PlatformRecorder>, RawError>;
}
