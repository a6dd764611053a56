//! Capture stream handle
//!
//! A [`CaptureStream`] owns a set of live hardware tracks. Clones share the
//! same underlying tracks; releasing any clone releases them all, exactly once.

use super::registry::HardwareRegistry;
use super::traits::{CaptureMode, MediaTrack, TrackKind};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

struct StreamInner {
    id: Uuid,
    mode: CaptureMode,
    tracks: Vec<Arc<dyn MediaTrack>>,
    released: AtomicBool,
    registry: HardwareRegistry,
}

/// Shared ownership handle over live hardware tracks
#[derive(Clone)]
pub struct CaptureStream {
    inner: Arc<StreamInner>,
}

impl CaptureStream {
    /// Wraps tracks returned by a backend and registers them
    pub fn new(mode: CaptureMode, tracks: Vec<Arc<dyn MediaTrack>>, registry: HardwareRegistry) -> Self {
        let id = Uuid::new_v4();
        registry.on_acquired(id, mode, tracks.len());
        Self {
            inner: Arc::new(StreamInner {
                id,
                mode,
                tracks,
                released: AtomicBool::new(false),
                registry,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn mode(&self) -> CaptureMode {
        self.inner.mode
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.inner.tracks
    }

    /// Device feeding the first track of `kind`
    pub fn device_id(&self, kind: TrackKind) -> Option<String> {
        self.inner
            .tracks
            .iter()
            .find(|track| track.kind() == kind)
            .and_then(|track| track.device_id())
    }

    /// `true` until released and while at least one track is live
    pub fn is_active(&self) -> bool {
        !self.is_released() && self.inner.tracks.iter().any(|track| track.is_live())
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub fn same_as(&self, other: &CaptureStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stops every live track
    ///
    /// Returns `true` for the call that performed the release and `false`
    /// for every later call. Track stop failures are logged, never returned.
    pub fn release(&self, reason: &str) -> bool {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            tracing::debug!("Capture stream {} already released ({})", self.inner.id, reason);
            return false;
        }

        let mut stopped = 0;
        for track in &self.inner.tracks {
            if !track.is_live() {
                continue;
            }
            match track.stop() {
                Ok(()) => stopped += 1,
                Err(e) => tracing::warn!("Failed to stop track {}: {}", track.id(), e),
            }
        }

        self.inner.registry.on_released(self.inner.id);
        tracing::info!(
            "Released capture stream {} ({} of {} tracks stopped, reason: {})",
            self.inner.id,
            stopped,
            self.inner.tracks.len(),
            reason
        );
        true
    }
}

impl fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureStream")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("tracks", &self.inner.tracks.len())
            .field("released", &self.is_released())
            .finish()
    }
}
