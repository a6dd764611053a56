//! Progressive chunk upload
//!
//! Each captured segment is registered under its capture-time index and
//! uploaded in the background through the [`FallbackRouter`]. Uploads may
//! finish in any order; the ledger keeps the original positions.

use super::backend::{AuthCache, LocalStore, RemoteBackend};
use super::chunks::{Chunk, ChunkLedger, ChunkManifest, ChunkOutcome, ChunkStatus, ChunkSummary};
use crate::recorder::mime::extension_for;
use crate::recorder::SegmentSink;
use crate::resilience::{FallbackRouter, RetryOptions, Route};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// Remote directory holding everything stored for one session
pub fn session_path(prefix: &str, session_id: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), urlencoding::encode(session_id))
}

pub fn chunk_dir(prefix: &str, session_id: &str) -> String {
    format!("{}/chunks", session_path(prefix, session_id))
}

pub fn chunk_path(prefix: &str, session_id: &str, index: u32, extension: &str) -> String {
    format!("{}/chunk_{:05}.{}", chunk_dir(prefix, session_id), index, extension)
}

pub fn recording_path(prefix: &str, session_id: &str, extension: &str) -> String {
    format!("{}/recording.{}", session_path(prefix, session_id), extension)
}

/// Uploads one session's chunks as they are captured
pub struct ChunkUploadPipeline {
    me: Weak<ChunkUploadPipeline>,
    session_id: String,
    path_prefix: String,
    content_type: String,
    remote: Arc<dyn RemoteBackend>,
    local: Arc<dyn LocalStore>,
    auth: Arc<AuthCache>,
    router: FallbackRouter,
    retry: RetryOptions,
    ledger: Mutex<ChunkLedger>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl ChunkUploadPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        path_prefix: impl Into<String>,
        content_type: impl Into<String>,
        remote: Arc<dyn RemoteBackend>,
        local: Arc<dyn LocalStore>,
        auth: Arc<AuthCache>,
        router: FallbackRouter,
        retry: RetryOptions,
    ) -> Arc<Self> {
        let session_id = session_id.into();
        let path_prefix = path_prefix.into();
        let content_type = content_type.into();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            session_id,
            path_prefix,
            content_type,
            remote,
            local,
            auth,
            router,
            retry,
            ledger: Mutex::new(ChunkLedger::new()),
            in_flight: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn chunk_path(&self, index: u32) -> String {
        chunk_path(&self.path_prefix, &self.session_id, index, extension_for(&self.content_type))
    }

    pub fn summary(&self) -> ChunkSummary {
        self.ledger.lock().summary()
    }

    pub fn chunk(&self, index: u32) -> Option<Chunk> {
        self.ledger.lock().get(index).cloned()
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.ledger.lock().chunks().cloned().collect()
    }

    /// Registers the chunk synchronously and uploads it in the background
    pub fn enqueue(&self, index: u32, data: Arc<Vec<u8>>) {
        if !self.ledger.lock().register(index, data.len() as u64) {
            tracing::warn!("Chunk {} already registered, skipping", index);
            return;
        }
        let Some(pipeline) = self.me.upgrade() else {
            return;
        };

        let handle = tokio::spawn(async move {
            pipeline.upload_chunk(&data, index).await;
        });

        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.push(handle);
    }

    /// Uploads one chunk, falling back to local storage
    ///
    /// Never fails: the outcome records whether the chunk reached storage.
    pub async fn upload_chunk(&self, data: &[u8], index: u32) -> ChunkOutcome {
        let generation = self.generation.load(Ordering::SeqCst);
        self.ledger.lock().register(index, data.len() as u64);

        let context = format!("chunk-{index}");
        let path = self.chunk_path(index);
        let path = path.as_str();
        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;

        let result = self
            .router
            .run(
                &context,
                &self.retry,
                |_attempt| async move {
                    attempts_ref.fetch_add(1, Ordering::SeqCst);
                    self.auth.ensure().await?;
                    self.remote
                        .upload_blob(path, data, &self.content_type)
                        .await
                        .map(|ack| ack.path)
                },
                || async move { self.local.save(path, data).await },
            )
            .await;

        let attempts = attempts.load(Ordering::SeqCst);
        let outcome = match result {
            Ok(routed) => {
                tracing::debug!("Chunk {} stored via {:?} after {} attempts", index, routed.route, attempts);
                ChunkOutcome {
                    index,
                    status: ChunkStatus::Uploaded,
                    route: Some(routed.route),
                    attempts,
                    location: Some(routed.value),
                    error: None,
                }
            }
            Err(error) => {
                tracing::error!("Chunk {} could not be stored: {}", index, error);
                ChunkOutcome {
                    index,
                    status: ChunkStatus::Failed,
                    route: None,
                    attempts,
                    location: None,
                    error: Some(error),
                }
            }
        };

        if self.generation.load(Ordering::SeqCst) == generation {
            self.ledger.lock().record(&outcome);
        } else {
            tracing::debug!("Dropping outcome of chunk {} from a reset pipeline", index);
        }
        outcome
    }

    /// Waits for in-flight uploads and reports what reached storage
    ///
    /// Failed and missing chunks are reported, not treated as an error.
    pub async fn finalize(&self) -> ChunkManifest {
        let pending: Vec<JoinHandle<()>> = self.in_flight.lock().drain(..).collect();
        for handle in pending {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!("Chunk upload task failed: {}", e);
                }
            }
        }

        let dir = chunk_dir(&self.path_prefix, &self.session_id);
        let manifest = self.ledger.lock().manifest(&dir);
        if manifest.is_complete() {
            tracing::info!(
                "Finalized {} chunks ({} bytes) for session {}",
                manifest.chunk_count,
                manifest.total_size,
                self.session_id
            );
        } else {
            tracing::warn!(
                "Finalized session {} with {} failed and {} missing chunks",
                self.session_id,
                manifest.failed.len(),
                manifest.missing.len()
            );
        }

        self.write_manifest(&manifest).await;
        manifest
    }

    /// Forgets every chunk; outcomes of uploads still running are dropped
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for handle in self.in_flight.lock().drain(..) {
            handle.abort();
        }
        self.ledger.lock().clear();
    }

    /// Best-effort deletion of stored chunks. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let stored: Vec<Chunk> = self
            .ledger
            .lock()
            .chunks()
            .filter(|chunk| chunk.status == ChunkStatus::Uploaded)
            .cloned()
            .collect();
        self.reset();

        let mut removed = 0;
        for chunk in stored {
            let path = self.chunk_path(chunk.index);
            let result = match chunk.route {
                Some(Route::Local) => self.local.remove(&path).await,
                _ => self.remote.delete_blob(&path).await,
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to delete chunk {}: {}", chunk.index, e),
            }
        }
        tracing::info!("Cleaned up {} chunks for session {}", removed, self.session_id);
        removed
    }

    async fn write_manifest(&self, manifest: &ChunkManifest) {
        let json = match serde_json::to_vec_pretty(manifest) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize chunk manifest: {}", e);
                return;
            }
        };
        let path = format!("{}/manifest.json", manifest.path);
        let path = path.as_str();
        let json = json.as_slice();

        let result = self
            .router
            .run(
                "chunk-manifest",
                &self.retry,
                |_attempt| async move {
                    self.auth.ensure().await?;
                    self.remote.upload_blob(path, json, "application/json").await.map(|_| ())
                },
                || async move { self.local.save(path, json).await.map(|_| ()) },
            )
            .await;
        if let Err(e) = result {
            tracing::warn!("Chunk manifest was not stored: {}", e);
        }
    }
}

impl SegmentSink for ChunkUploadPipeline {
    fn accept(&self, index: u32, data: Arc<Vec<u8>>) {
        self.enqueue(index, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_encode_session_segment() {
        assert_eq!(session_path("recordings/", "a b/c"), "recordings/a%20b%2Fc");
        assert_eq!(
            chunk_path("recordings", "s1", 7, "webm"),
            "recordings/s1/chunks/chunk_00007.webm"
        );
        assert_eq!(recording_path("recordings", "s1", "m4a"), "recordings/s1/recording.m4a");
    }
}
