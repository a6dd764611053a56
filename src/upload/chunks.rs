//! Chunk bookkeeping
//!
//! Chunks are keyed by the index assigned at capture time, so the ledger can
//! report gaps and failures precisely whatever order uploads finish in.

use crate::resilience::Route;
use crate::utils::error::{ClassifiedError, ErrorResponse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upload outcome of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Uploaded,
    Failed,
}

/// One indexed slice of recorded data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub index: u32,
    pub size: u64,
    pub status: ChunkStatus,
    pub route: Option<Route>,
    pub attempts: u32,
    /// Remote path or local file the chunk ended up at
    pub location: Option<String>,
    pub error: Option<ErrorResponse>,
}

/// Result of [`upload_chunk`](super::ChunkUploadPipeline::upload_chunk)
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutcome {
    pub index: u32,
    pub status: ChunkStatus,
    pub route: Option<Route>,
    pub attempts: u32,
    pub location: Option<String>,
    pub error: Option<ClassifiedError>,
}

impl ChunkOutcome {
    pub fn is_uploaded(&self) -> bool {
        self.status == ChunkStatus::Uploaded
    }
}

/// Counts for UI display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSummary {
    pub total: u32,
    pub pending: u32,
    pub uploaded: u32,
    pub failed: u32,
    pub bytes: u64,
}

/// What `finalize` reports about a session's chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManifest {
    /// Directory the chunks were written under
    pub path: String,
    pub chunk_count: u32,
    pub total_size: u64,
    pub uploaded: Vec<u32>,
    pub failed: Vec<u32>,
    /// Indices below the highest seen index that were never registered
    pub missing: Vec<u32>,
    /// Uploaded indices that went to the local fallback
    pub stored_locally: Vec<u32>,
}

impl ChunkManifest {
    /// `true` when every index up to the last one reached storage
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.missing.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkLedger {
    chunks: BTreeMap<u32, Chunk>,
}

impl ChunkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending chunk. Returns `false` if the index is taken.
    pub fn register(&mut self, index: u32, size: u64) -> bool {
        if self.chunks.contains_key(&index) {
            return false;
        }
        self.chunks.insert(
            index,
            Chunk {
                index,
                size,
                status: ChunkStatus::Pending,
                route: None,
                attempts: 0,
                location: None,
                error: None,
            },
        );
        true
    }

    pub fn record(&mut self, outcome: &ChunkOutcome) {
        if let Some(chunk) = self.chunks.get_mut(&outcome.index) {
            chunk.status = outcome.status;
            chunk.route = outcome.route;
            chunk.attempts = outcome.attempts;
            chunk.location = outcome.location.clone();
            chunk.error = outcome.error.as_ref().map(ErrorResponse::from);
        }
    }

    pub fn get(&self, index: u32) -> Option<&Chunk> {
        self.chunks.get(&index)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn summary(&self) -> ChunkSummary {
        let mut summary = ChunkSummary::default();
        for chunk in self.chunks.values() {
            summary.total += 1;
            summary.bytes += chunk.size;
            match chunk.status {
                ChunkStatus::Pending => summary.pending += 1,
                ChunkStatus::Uploaded => summary.uploaded += 1,
                ChunkStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn missing(&self) -> Vec<u32> {
        let Some(&last) = self.chunks.keys().next_back() else {
            return Vec::new();
        };
        (0..last).filter(|index| !self.chunks.contains_key(index)).collect()
    }

    fn indices_where(&self, predicate: impl Fn(&Chunk) -> bool) -> Vec<u32> {
        self.chunks
            .values()
            .filter(|chunk| predicate(chunk))
            .map(|chunk| chunk.index)
            .collect()
    }

    pub fn manifest(&self, path: &str) -> ChunkManifest {
        ChunkManifest {
            path: path.to_string(),
            chunk_count: self.chunks.len() as u32,
            total_size: self.chunks.values().map(|chunk| chunk.size).sum(),
            uploaded: self.indices_where(|chunk| chunk.status == ChunkStatus::Uploaded),
            failed: self.indices_where(|chunk| chunk.status != ChunkStatus::Uploaded),
            missing: self.missing(),
            stored_locally: self.indices_where(|chunk| {
                chunk.status == ChunkStatus::Uploaded && chunk.route == Some(Route::Local)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: u32, status: ChunkStatus, route: Option<Route>) -> ChunkOutcome {
        ChunkOutcome {
            index,
            status,
            route,
            attempts: 1,
            location: None,
            error: None,
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut ledger = ChunkLedger::new();
        assert!(ledger.register(0, 10));
        assert!(!ledger.register(0, 10));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_manifest_reports_gaps_and_failures() {
        let mut ledger = ChunkLedger::new();
        for index in [0, 1, 3] {
            ledger.register(index, 100);
        }
        ledger.record(&outcome(3, ChunkStatus::Uploaded, Some(Route::Remote)));
        ledger.record(&outcome(0, ChunkStatus::Uploaded, Some(Route::Local)));
        ledger.record(&outcome(1, ChunkStatus::Failed, None));

        let manifest = ledger.manifest("recordings/s1/chunks");
        assert_eq!(manifest.chunk_count, 3);
        assert_eq!(manifest.total_size, 300);
        assert_eq!(manifest.uploaded, vec![0, 3]);
        assert_eq!(manifest.failed, vec![1]);
        assert_eq!(manifest.missing, vec![2]);
        assert_eq!(manifest.stored_locally, vec![0]);
        assert!(!manifest.is_complete());
    }

    #[test]
    fn test_summary_counts() {
        let mut ledger = ChunkLedger::new();
        ledger.register(0, 5);
        ledger.register(1, 7);
        ledger.record(&outcome(0, ChunkStatus::Uploaded, Some(Route::Remote)));

        let summary = ledger.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.bytes, 12);
    }
}
