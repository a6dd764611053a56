//! Upload pipeline
//!
//! This module delivers recorded data to the remote backend:
//! - RemoteBackend/LocalStore seams and the filesystem store
//! - Chunk ledger and manifest
//! - ChunkUploadPipeline for progressive per-chunk uploads

pub mod backend;
pub mod chunks;
pub mod pipeline;

pub use backend::{AuthCache, FsLocalStore, Identity, LocalStore, OfflineBackend, RemoteBackend, UploadAck};
pub use chunks::{Chunk, ChunkManifest, ChunkOutcome, ChunkStatus, ChunkSummary};
pub use pipeline::ChunkUploadPipeline;
