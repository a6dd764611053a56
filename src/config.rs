//! Engine configuration
//!
//! Every field has a default so a partial JSON document (or none at all) is a
//! valid configuration. Feature flags can be overridden from the environment.

use crate::resilience::RetryOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_BACKEND_ENABLED: &str = "CAPTURE_RELAY_BACKEND_ENABLED";
pub const ENV_CHUNK_UPLOAD: &str = "CAPTURE_RELAY_CHUNK_UPLOAD";
pub const ENV_DEBUG: &str = "CAPTURE_RELAY_DEBUG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Boolean capability switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlags {
    /// Remote backend reachable at all; when off every write goes local
    pub backend_enabled: bool,
    /// Upload segments progressively while recording
    pub chunk_upload_enabled: bool,
    pub debug_logging: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            backend_enabled: true,
            chunk_upload_enabled: false,
            debug_logging: false,
        }
    }
}

/// Recording lifecycle timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    pub countdown_secs: u32,
    /// Recorder timeslice; one chunk is produced per slice
    pub timeslice_ms: u64,
    /// Delay between the stop request and the early hardware release
    pub stop_grace_ms: u64,
    /// Ceiling on waiting for the recorder to report completion
    pub stop_timeout_ms: u64,
    pub max_duration_secs: Option<u64>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            countdown_secs: 3,
            timeslice_ms: 10_000,
            stop_grace_ms: 200,
            stop_timeout_ms: 5_000,
            max_duration_secs: None,
        }
    }
}

impl RecorderSettings {
    /// Longest a caller waits for the artifact after asking to stop
    pub fn artifact_wait(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms.saturating_add(self.stop_grace_ms))
            .saturating_add(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    /// Ceiling on a pending permission prompt
    pub permission_timeout_ms: u64,
    /// Track hardware usage for leak diagnostics
    pub track_hardware: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            permission_timeout_ms: 30_000,
            track_hardware: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadSettings {
    /// Remote path prefix for session artifacts
    pub path_prefix: String,
    /// Root directory of the local fallback store
    pub local_dir: PathBuf,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            path_prefix: "recordings".to_string(),
            local_dir: std::env::temp_dir().join("capture-relay"),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub flags: FeatureFlags,
    pub retry: RetryOptions,
    pub recorder: RecorderSettings,
    pub capture: CaptureSettings,
    pub upload: UploadSettings,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        tracing::info!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    /// Applies `CAPTURE_RELAY_*` flag overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    /// Applies flag overrides from an arbitrary lookup
    pub fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut bool); 3] = [
            (ENV_BACKEND_ENABLED, &mut self.flags.backend_enabled),
            (ENV_CHUNK_UPLOAD, &mut self.flags.chunk_upload_enabled),
            (ENV_DEBUG, &mut self.flags.debug_logging),
        ];
        for (key, slot) in overrides {
            let Some(raw) = lookup(key) else {
                continue;
            };
            match parse_flag(&raw) {
                Some(value) => *slot = value,
                None => tracing::warn!("Ignoring unrecognized value {:?} for {}", raw, key),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recorder.timeslice_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "recorder.timesliceMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry.exponential_base.is_nan() || self.retry.exponential_base < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.exponentialBase",
                reason: format!("must be at least 1, got {}", self.retry.exponential_base),
            });
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.maxDelayMs",
                reason: "must not be smaller than baseDelayMs".to_string(),
            });
        }
        Ok(())
    }
}

/// Parses `1/true/on/yes` and `0/false/off/no`, case-insensitively
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.flags.backend_enabled);
        assert_eq!(config.recorder.stop_grace_ms, 200);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"flags": {"chunkUploadEnabled": true}, "retry": {"maxRetries": 5}}"#,
        )
        .unwrap();
        assert!(config.flags.chunk_upload_enabled);
        assert!(config.flags.backend_enabled);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);
    }

    #[test]
    fn test_artifact_wait_saturates() {
        let settings = RecorderSettings::default();
        assert_eq!(settings.artifact_wait(), Duration::from_millis(6_200));

        let huge = RecorderSettings {
            stop_timeout_ms: u64::MAX,
            stop_grace_ms: u64::MAX,
            ..RecorderSettings::default()
        };
        assert!(huge.artifact_wait() >= Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_slice = EngineConfig::from_json_str(r#"{"recorder": {"timesliceMs": 0}}"#);
        assert!(matches!(zero_slice, Err(ConfigError::Invalid { .. })));

        let shrinking = EngineConfig::from_json_str(r#"{"retry": {"exponentialBase": 0.5}}"#);
        assert!(matches!(shrinking, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_BACKEND_ENABLED, "off"),
            (ENV_CHUNK_UPLOAD, "YES"),
            (ENV_DEBUG, "maybe"),
        ]);
        let mut config = EngineConfig::default();
        config.apply_overrides_with(|key| env.get(key).map(|v| v.to_string()));

        assert!(!config.flags.backend_enabled);
        assert!(config.flags.chunk_upload_enabled);
        assert!(!config.flags.debug_logging);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"capture": {"permissionTimeoutMs": 500}}"#).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.capture.permission_timeout_ms, 500);

        assert!(matches!(
            EngineConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
