//! Hardware usage registry
//!
//! Tracks which capture streams currently hold hardware so leaks can be
//! diagnosed. The registry is owned and injected; a disabled registry records
//! nothing.

use super::traits::CaptureMode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StreamRecord {
    mode: CaptureMode,
    track_count: usize,
    acquired_at: std::time::Instant,
}

#[derive(Debug, Default)]
struct RegistryState {
    live: HashMap<Uuid, StreamRecord>,
    releases: HashMap<Uuid, u32>,
    acquired_total: u64,
    released_total: u64,
}

/// Injectable tracker of live capture streams
#[derive(Debug, Clone, Default)]
pub struct HardwareRegistry {
    state: Option<Arc<Mutex<RegistryState>>>,
}

impl HardwareRegistry {
    /// Registry that records acquisitions and releases
    pub fn tracking() -> Self {
        Self {
            state: Some(Arc::new(Mutex::new(RegistryState::default()))),
        }
    }

    /// No-op registry
    pub fn disabled() -> Self {
        Self { state: None }
    }

    pub fn is_tracking(&self) -> bool {
        self.state.is_some()
    }

    pub(crate) fn on_acquired(&self, id: Uuid, mode: CaptureMode, track_count: usize) {
        if let Some(state) = &self.state {
            let mut state = state.lock();
            state.acquired_total += 1;
            state.live.insert(
                id,
                StreamRecord {
                    mode,
                    track_count,
                    acquired_at: std::time::Instant::now(),
                },
            );
        }
    }

    pub(crate) fn on_released(&self, id: Uuid) {
        if let Some(state) = &self.state {
            let mut state = state.lock();
            state.live.remove(&id);
            state.released_total += 1;
            *state.releases.entry(id).or_insert(0) += 1;
        }
    }

    /// Streams that still hold hardware
    pub fn live_streams(&self) -> Vec<Uuid> {
        match &self.state {
            Some(state) => state.lock().live.keys().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Number of release cycles recorded for one stream
    pub fn release_count(&self, id: Uuid) -> u32 {
        match &self.state {
            Some(state) => state.lock().releases.get(&id).copied().unwrap_or(0),
            None => 0,
        }
    }

    pub fn acquired_total(&self) -> u64 {
        self.state.as_ref().map(|s| s.lock().acquired_total).unwrap_or(0)
    }

    pub fn released_total(&self) -> u64 {
        self.state.as_ref().map(|s| s.lock().released_total).unwrap_or(0)
    }

    /// Logs every stream still holding hardware and returns how many there are
    pub fn report_leaks(&self) -> usize {
        let Some(state) = &self.state else {
            return 0;
        };
        let state = state.lock();
        for (id, record) in &state.live {
            tracing::warn!(
                "Capture stream {} ({} mode, {} tracks) still live after {:.1}s",
                id,
                record.mode.as_str(),
                record.track_count,
                record.acquired_at.elapsed().as_secs_f64()
            );
        }
        state.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_registry_counts_cycles() {
        let registry = HardwareRegistry::tracking();
        let id = Uuid::new_v4();
        registry.on_acquired(id, CaptureMode::Video, 2);
        assert_eq!(registry.live_streams(), vec![id]);
        assert_eq!(registry.report_leaks(), 1);

        registry.on_released(id);
        assert!(registry.live_streams().is_empty());
        assert_eq!(registry.release_count(id), 1);
        assert_eq!(registry.acquired_total(), 1);
        assert_eq!(registry.released_total(), 1);
    }

    #[test]
    fn test_disabled_registry_is_inert() {
        let registry = HardwareRegistry::disabled();
        let id = Uuid::new_v4();
        registry.on_acquired(id, CaptureMode::Audio, 1);
        assert!(registry.live_streams().is_empty());
        assert_eq!(registry.report_leaks(), 0);
        assert!(!registry.is_tracking());
    }
}
