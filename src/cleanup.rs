//! Cleanup coordination
//!
//! Guarantees that hardware tracks and timers are released on every exit path:
//! success, error, reset and teardown. Every operation here is idempotent and
//! none of them can fail.

use crate::capture::CaptureStream;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Owner-alive flag consulted before every state mutation that follows an await
#[derive(Debug, Clone)]
pub struct OwnerGuard {
    alive: Arc<AtomicBool>,
}

impl OwnerGuard {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Marks the owner as torn down. Returns `true` on the first call only.
    pub fn mark_torn_down(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }
}

impl Default for OwnerGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases hardware and cancels timers on behalf of one session owner
#[derive(Debug, Clone)]
pub struct CleanupCoordinator {
    owner: OwnerGuard,
    timers: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
}

impl CleanupCoordinator {
    pub fn new(owner: OwnerGuard) -> Self {
        Self {
            owner,
            timers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn owner(&self) -> &OwnerGuard {
        &self.owner
    }

    /// Releases a stream immediately. Safe to call any number of times.
    pub fn release_stream(&self, stream: &CaptureStream, reason: &str) -> bool {
        stream.release(reason)
    }

    /// Releases `stream` after `delay`
    ///
    /// The release runs even if the owner is torn down in the meantime; it is
    /// the last line of defense against a leaked hardware indicator.
    pub fn schedule_release(&self, stream: CaptureStream, delay: Duration, reason: &'static str) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            stream.release(reason);
        });
    }

    /// Keeps a timer handle so it can be cancelled on reset or teardown
    pub fn track_timer(&self, label: &'static str, handle: JoinHandle<()>) {
        let mut timers = self.timers.lock();
        timers.retain(|(_, handle)| !handle.is_finished());
        timers.push((label, handle));
    }

    /// Aborts every tracked timer
    pub fn cancel_timers(&self) {
        let timers: Vec<_> = self.timers.lock().drain(..).collect();
        for (label, handle) in timers {
            if !handle.is_finished() {
                tracing::debug!("Cancelling timer: {}", label);
                handle.abort();
            }
        }
    }

    /// Final sweep: cancels timers and releases every stream passed in
    pub fn sweep<'a>(&self, streams: impl IntoIterator<Item = &'a CaptureStream>, reason: &str) -> usize {
        self.cancel_timers();
        streams
            .into_iter()
            .filter(|stream| stream.release(reason))
            .count()
    }
}
