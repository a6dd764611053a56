//! Shared fixtures for engine integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use capture_relay::capture::synthetic::SyntheticCaptureBackend;
use capture_relay::config::EngineConfig;
use capture_relay::recorder::synthetic::{RecorderBehavior, SyntheticRecorderFactory};
use capture_relay::recorder::RecordingEvent;
use capture_relay::resilience::RetryOptions;
use capture_relay::upload::{Identity, LocalStore, RemoteBackend, UploadAck};
use capture_relay::{EngineDeps, HardwareRegistry, RawError, RecordingEngine};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Transient network failure without a backend code.
pub fn transient() -> RawError {
    RawError::message("network request failed")
}

/// Permanent quota failure as reported by blob storage.
pub fn quota() -> RawError {
    RawError::coded("storage/quota-exceeded", "bucket full")
}

/// Remote backend whose failures are scripted per call.
#[derive(Default)]
pub struct ScriptedBackend {
    pub auth_calls: AtomicU32,
    pub upload_calls: AtomicU32,
    pub status_calls: Mutex<Vec<serde_json::Value>>,
    pub deleted: Mutex<Vec<String>>,
    pub stored: Mutex<Vec<(String, usize)>>,
    attempts: Mutex<HashMap<String, u32>>,
    path_failures: Mutex<HashMap<String, VecDeque<RawError>>>,
    upload_failures: Mutex<VecDeque<RawError>>,
    always_fail_uploads: Mutex<Option<RawError>>,
    status_failure: Mutex<Option<RawError>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the next uploads of any path containing `fragment`.
    pub fn fail_path(&self, fragment: &str, errors: Vec<RawError>) {
        self.path_failures
            .lock()
            .entry(fragment.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fails the next uploads regardless of path.
    pub fn fail_next_uploads(&self, errors: Vec<RawError>) {
        self.upload_failures.lock().extend(errors);
    }

    pub fn fail_all_uploads(&self, error: RawError) {
        *self.always_fail_uploads.lock() = Some(error);
    }

    pub fn fail_status_updates(&self, error: RawError) {
        *self.status_failure.lock() = Some(error);
    }

    /// Delays uploads of any path containing `fragment`.
    pub fn delay_path(&self, fragment: &str, delay: Duration) {
        self.delays.lock().insert(fragment.to_string(), delay);
    }

    /// Upload attempts made for paths containing `fragment`.
    pub fn attempts_for(&self, fragment: &str) -> u32 {
        self.attempts
            .lock()
            .iter()
            .filter(|(path, _)| path.contains(fragment))
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.status_calls
            .lock()
            .iter()
            .filter_map(|fields| fields.get("status").and_then(|s| s.as_str()).map(str::to_string))
            .collect()
    }

    /// Every call made to the backend, of any kind.
    pub fn total_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst) as usize
            + self.upload_calls.load(Ordering::SeqCst) as usize
            + self.status_calls.lock().len()
            + self.deleted.lock().len()
    }

    fn next_failure(&self, path: &str) -> Option<RawError> {
        if let Some(error) = self.always_fail_uploads.lock().clone() {
            return Some(error);
        }
        {
            let mut scripted = self.path_failures.lock();
            for (fragment, queue) in scripted.iter_mut() {
                if path.contains(fragment.as_str()) {
                    if let Some(error) = queue.pop_front() {
                        return Some(error);
                    }
                }
            }
        }
        self.upload_failures.lock().pop_front()
    }

    fn delay_for(&self, path: &str) -> Option<Duration> {
        self.delays
            .lock()
            .iter()
            .find(|(fragment, _)| path.contains(fragment.as_str()))
            .map(|(_, delay)| *delay)
    }
}

#[async_trait]
impl RemoteBackend for ScriptedBackend {
    async fn authenticate(&self) -> Result<Identity, RawError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Identity {
            uid: "anon-1".to_string(),
            anonymous: true,
        })
    }

    async fn upload_blob(&self, path: &str, data: &[u8], _content_type: &str) -> Result<UploadAck, RawError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        *self.attempts.lock().entry(path.to_string()).or_insert(0) += 1;

        if let Some(delay) = self.delay_for(path) {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.next_failure(path) {
            return Err(error);
        }
        self.stored.lock().push((path.to_string(), data.len()));
        Ok(UploadAck {
            path: path.to_string(),
            size: data.len() as u64,
        })
    }

    async fn update_session_status(&self, _session_id: &str, fields: &serde_json::Value) -> Result<(), RawError> {
        self.status_calls.lock().push(fields.clone());
        match self.status_failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn delete_blob(&self, path: &str) -> Result<(), RawError> {
        self.deleted.lock().push(path.to_string());
        Ok(())
    }
}

/// In-memory local store.
#[derive(Default)]
pub struct MemoryStore {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub removed: Mutex<Vec<String>>,
    failure: Mutex<Option<RawError>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_all(&self, error: RawError) {
        *self.failure.lock() = Some(error);
    }

    pub fn contains(&self, fragment: &str) -> bool {
        self.files.lock().keys().any(|path| path.contains(fragment))
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn save(&self, path: &str, data: &[u8]) -> Result<String, RawError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        self.files.lock().insert(path.to_string(), data.to_vec());
        Ok(format!("memory://{path}"))
    }

    async fn remove(&self, path: &str) -> Result<(), RawError> {
        self.files.lock().remove(path);
        self.removed.lock().push(path.to_string());
        Ok(())
    }
}

/// Retry policy without jitter so virtual-time assertions are exact.
pub fn fast_retry(max_retries: u32) -> RetryOptions {
    RetryOptions {
        max_retries,
        base_delay_ms: 100,
        max_delay_ms: 1_000,
        exponential_base: 2.0,
        jitter: false,
    }
}

/// Config with short countdown and deterministic retries.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry = fast_retry(3);
    config.recorder.countdown_secs = 1;
    config.recorder.timeslice_ms = 1_000;
    config
}

pub struct Harness {
    pub engine: RecordingEngine,
    pub capture: Arc<SyntheticCaptureBackend>,
    pub recorders: Arc<SyntheticRecorderFactory>,
    pub remote: Arc<ScriptedBackend>,
    pub local: Arc<MemoryStore>,
    pub registry: HardwareRegistry,
}

pub fn harness(config: EngineConfig) -> Harness {
    harness_with(config, RecorderBehavior::default())
}

pub fn harness_with(config: EngineConfig, behavior: RecorderBehavior) -> Harness {
    let capture = Arc::new(SyntheticCaptureBackend::with_default_devices());
    let recorders = Arc::new(SyntheticRecorderFactory::new().with_behavior(behavior));
    let remote = ScriptedBackend::new();
    let local = MemoryStore::new();
    let registry = HardwareRegistry::tracking();

    let engine = RecordingEngine::new(
        "session-1",
        config,
        EngineDeps {
            capture: capture.clone(),
            recorders: recorders.clone(),
            remote: remote.clone(),
            local: local.clone(),
            registry: registry.clone(),
        },
    );

    Harness {
        engine,
        capture,
        recorders,
        remote,
        local,
        registry,
    }
}

/// Waits for the first event matching `predicate`, skipping others.
pub async fn wait_for(
    events: &mut broadcast::Receiver<RecordingEvent>,
    predicate: impl Fn(&RecordingEvent) -> bool,
) -> RecordingEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event should arrive")
}

pub async fn wait_started(events: &mut broadcast::Receiver<RecordingEvent>) {
    wait_for(events, |event| matches!(event, RecordingEvent::Started { .. })).await;
}

/// Drains already-delivered events.
pub fn drain(events: &mut broadcast::Receiver<RecordingEvent>) -> Vec<RecordingEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
