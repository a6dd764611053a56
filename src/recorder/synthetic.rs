//! In-process recorder
//!
//! Mirrors the behavior of a browser media recorder closely enough to drive
//! the state machine without hardware: stop flushes a final segment and then
//! reports completion, possibly more than once.

use super::mime::{AUDIO_MIME_CANDIDATES, VIDEO_MIME_CANDIDATES};
use super::platform::{PlatformRecorder, RecorderEvent, RecorderEventSink, RecorderFactory};
use crate::capture::CaptureStream;
use crate::utils::error::RawError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How synthetic recorders respond to requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderBehavior {
    /// Segment flushed when stop is requested; empty means none
    pub final_segment: Vec<u8>,
    /// `Stopped` events sent per stop request; zero simulates a recorder
    /// that never reports completion
    pub stop_signals: u32,
    /// Segment emitted every timeslice while recording
    pub generated_segment: Option<Vec<u8>>,
}

impl Default for RecorderBehavior {
    fn default() -> Self {
        Self {
            final_segment: b"final-segment".to_vec(),
            stop_signals: 1,
            generated_segment: None,
        }
    }
}

#[derive(Debug, Default)]
struct RecorderFlags {
    started: bool,
    paused: bool,
    stopped: bool,
}

/// Recorder that produces scripted segments
pub struct SyntheticRecorder {
    mime_type: String,
    events: RecorderEventSink,
    behavior: RecorderBehavior,
    flags: Arc<Mutex<RecorderFlags>>,
    generator: Mutex<Option<JoinHandle<()>>>,
    stop_calls: AtomicU32,
}

impl SyntheticRecorder {
    fn new(mime_type: &str, events: RecorderEventSink, behavior: RecorderBehavior) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            events,
            behavior,
            flags: Arc::new(Mutex::new(RecorderFlags::default())),
            generator: Mutex::new(None),
            stop_calls: AtomicU32::new(0),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn is_recording(&self) -> bool {
        let flags = self.flags.lock();
        flags.started && !flags.paused && !flags.stopped
    }

    pub fn is_paused(&self) -> bool {
        self.flags.lock().paused
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Emits a data segment as if a timeslice elapsed. Returns `false` once
    /// the listener is gone.
    pub fn emit_data(&self, data: impl Into<Vec<u8>>) -> bool {
        self.events.send(RecorderEvent::DataAvailable(data.into())).is_ok()
    }

    /// Emits a completion signal without a stop request
    pub fn emit_stopped(&self) -> bool {
        self.events.send(RecorderEvent::Stopped).is_ok()
    }

    pub fn emit_error(&self, error: RawError) -> bool {
        self.events.send(RecorderEvent::Error(error)).is_ok()
    }

    fn spawn_generator(&self, timeslice: Duration, segment: Vec<u8>) {
        let flags = self.flags.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(timeslice).await;
                let (paused, stopped) = {
                    let flags = flags.lock();
                    (flags.paused, flags.stopped)
                };
                if stopped {
                    break;
                }
                if paused {
                    continue;
                }
                if events.send(RecorderEvent::DataAvailable(segment.clone())).is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self.generator.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl PlatformRecorder for SyntheticRecorder {
    fn start(&self, timeslice: Option<Duration>) -> Result<(), RawError> {
        {
            let mut flags = self.flags.lock();
            if flags.started {
                return Err(RawError::coded("InvalidStateError", "recorder already started"));
            }
            flags.started = true;
        }
        if let (Some(timeslice), Some(segment)) = (timeslice, self.behavior.generated_segment.clone()) {
            self.spawn_generator(timeslice, segment);
        }
        Ok(())
    }

    fn pause(&self) -> Result<(), RawError> {
        let mut flags = self.flags.lock();
        if !flags.started || flags.stopped {
            return Err(RawError::coded("InvalidStateError", "recorder is not recording"));
        }
        flags.paused = true;
        Ok(())
    }

    fn resume(&self) -> Result<(), RawError> {
        let mut flags = self.flags.lock();
        if !flags.started || flags.stopped {
            return Err(RawError::coded("InvalidStateError", "recorder is not recording"));
        }
        flags.paused = false;
        Ok(())
    }

    fn stop(&self) -> Result<(), RawError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut flags = self.flags.lock();
            if flags.stopped {
                return Err(RawError::coded("InvalidStateError", "recorder already stopped"));
            }
            flags.stopped = true;
        }
        if let Some(generator) = self.generator.lock().take() {
            generator.abort();
        }

        if !self.behavior.final_segment.is_empty() {
            let _ = self
                .events
                .send(RecorderEvent::DataAvailable(self.behavior.final_segment.clone()));
        }
        for _ in 0..self.behavior.stop_signals {
            let _ = self.events.send(RecorderEvent::Stopped);
        }
        Ok(())
    }
}

/// Factory handing out [`SyntheticRecorder`]s
pub struct SyntheticRecorderFactory {
    supported: Vec<String>,
    behavior: Mutex<RecorderBehavior>,
    create_failure: Mutex<Option<RawError>>,
    create_delay: Mutex<Option<Duration>>,
    recorders: Mutex<Vec<Arc<SyntheticRecorder>>>,
}

impl SyntheticRecorderFactory {
    /// Supports every candidate format
    pub fn new() -> Self {
        let all: Vec<&str> = VIDEO_MIME_CANDIDATES
            .iter()
            .chain(AUDIO_MIME_CANDIDATES.iter())
            .copied()
            .collect();
        Self::supporting(&all)
    }

    pub fn supporting(mime_types: &[&str]) -> Self {
        Self {
            supported: mime_types.iter().map(|mime| mime.to_string()).collect(),
            behavior: Mutex::new(RecorderBehavior::default()),
            create_failure: Mutex::new(None),
            create_delay: Mutex::new(None),
            recorders: Mutex::new(Vec::new()),
        }
    }

    pub fn with_behavior(self, behavior: RecorderBehavior) -> Self {
        *self.behavior.lock() = behavior;
        self
    }

    /// Applies to recorders created from now on
    pub fn set_behavior(&self, behavior: RecorderBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn fail_next_create(&self, error: RawError) {
        *self.create_failure.lock() = Some(error);
    }

    /// Blocks the calling thread in `create_recorder`, like a slow platform
    /// encoder setup
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        *self.create_delay.lock() = delay;
    }

    pub fn recorders(&self) -> Vec<Arc<SyntheticRecorder>> {
        self.recorders.lock().clone()
    }

    pub fn last_recorder(&self) -> Option<Arc<SyntheticRecorder>> {
        self.recorders.lock().last().cloned()
    }
}

impl Default for SyntheticRecorderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderFactory for SyntheticRecorderFactory {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|supported| supported == mime_type)
    }

    fn create_recorder(
        &self,
        stream: &CaptureStream,
        mime_type: &str,
        events: RecorderEventSink,
    ) -> Result<Arc<dyn PlatformRecorder>, RawError> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(error) = self.create_failure.lock().take() {
            return Err(error);
        }
        if !stream.is_active() {
            return Err(RawError::coded("InvalidStateError", "capture stream is not active"));
        }
        if !self.is_type_supported(mime_type) {
            return Err(RawError::coded("NotSupportedError", format!("{mime_type} is not supported")));
        }

        let behavior = self.behavior.lock().clone();
        let recorder = Arc::new(SyntheticRecorder::new(mime_type, events, behavior));
        self.recorders.lock().push(recorder.clone());
        Ok(recorder)
    }
}
