//! Remote and local storage seams
//!
//! The remote backend SDK is reached only through [`RemoteBackend`]; the local
//! fallback only through [`LocalStore`].

use crate::utils::error::RawError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity returned by a successful sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub anonymous: bool,
}

/// Acknowledgement of a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    pub path: String,
    pub size: u64,
}

/// Remote backend contract
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn authenticate(&self) -> Result<Identity, RawError>;

    async fn upload_blob(&self, path: &str, data: &[u8], content_type: &str) -> Result<UploadAck, RawError>;

    /// Merges `fields` into the session's status document
    async fn update_session_status(&self, session_id: &str, fields: &serde_json::Value) -> Result<(), RawError>;

    async fn delete_blob(&self, path: &str) -> Result<(), RawError>;
}

/// Signs in once per session and reuses the identity afterwards
pub struct AuthCache {
    remote: Arc<dyn RemoteBackend>,
    identity: Mutex<Option<Identity>>,
}

impl AuthCache {
    pub fn new(remote: Arc<dyn RemoteBackend>) -> Self {
        Self {
            remote,
            identity: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }

    /// Returns the cached identity or signs in. Failures are not cached.
    pub async fn ensure(&self) -> Result<Identity, RawError> {
        if let Some(identity) = self.identity() {
            return Ok(identity);
        }
        let identity = self.remote.authenticate().await?;
        tracing::debug!("Authenticated as {}", identity.uid);
        *self.identity.lock() = Some(identity.clone());
        Ok(identity)
    }

    pub fn clear(&self) {
        self.identity.lock().take();
    }
}

/// Local fallback storage
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Stores `data` under the relative `path` and returns where it landed
    async fn save(&self, path: &str, data: &[u8]) -> Result<String, RawError>;

    /// Removes a stored file. Missing files are not an error.
    async fn remove(&self, path: &str) -> Result<(), RawError>;
}

/// [`LocalStore`] rooted at a directory
#[derive(Debug, Clone)]
pub struct FsLocalStore {
    root: PathBuf,
}

impl FsLocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a relative storage path below the root, rejecting traversal
    fn resolve(&self, path: &str) -> Result<PathBuf, RawError> {
        let mut resolved = self.root.clone();
        let mut segments = 0;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            if segment == "." || segment == ".." || segment.contains('\\') {
                return Err(RawError::coded(
                    "local/invalid-path",
                    format!("refusing to store outside the local root: {path}"),
                ));
            }
            resolved.push(segment);
            segments += 1;
        }
        if segments == 0 {
            return Err(RawError::coded("local/invalid-path", "empty storage path"));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl LocalStore for FsLocalStore {
    async fn save(&self, path: &str, data: &[u8]) -> Result<String, RawError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await?;
        tracing::debug!("Stored {} bytes locally at {:?}", data.len(), target);
        Ok(target.to_string_lossy().to_string())
    }

    async fn remove(&self, path: &str) -> Result<(), RawError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Backend used when no remote is configured; every call fails as unavailable
#[derive(Debug, Clone, Default)]
pub struct OfflineBackend;

impl OfflineBackend {
    fn unavailable() -> RawError {
        RawError::coded("functions/unavailable", "no remote backend is configured")
    }
}

#[async_trait]
impl RemoteBackend for OfflineBackend {
    async fn authenticate(&self) -> Result<Identity, RawError> {
        Err(Self::unavailable())
    }

    async fn upload_blob(&self, _path: &str, _data: &[u8], _content_type: &str) -> Result<UploadAck, RawError> {
        Err(Self::unavailable())
    }

    async fn update_session_status(&self, _session_id: &str, _fields: &serde_json::Value) -> Result<(), RawError> {
        Err(Self::unavailable())
    }

    async fn delete_blob(&self, _path: &str) -> Result<(), RawError> {
        Err(Self::unavailable())
    }
}
