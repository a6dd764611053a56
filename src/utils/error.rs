//! Error types and handling
//!
//! Common error types used across the engine. Raw errors coming from the
//! platform or the backend are normalized into a [`ClassifiedError`] before
//! they cross a component boundary.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Normalized error taxonomy, independent of the originating subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Network,
    Timeout,
    QuotaExceeded,
    PermissionDenied,
    InvalidInput,
    Unknown,
}

impl ErrorKind {
    /// Stable code used in frontend responses
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::QuotaExceeded => "quota-exceeded",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// An error exactly as reported by the platform or the backend SDK
///
/// `code` carries either a namespaced backend code (`storage/quota-exceeded`)
/// or a platform error name (`NotAllowedError`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render_raw(.code, .message))]
pub struct RawError {
    pub code: Option<String>,
    pub message: String,
}

impl RawError {
    /// Error carrying a backend or platform code
    pub fn coded(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Error carrying only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

fn render_raw(code: &Option<String>, message: &str) -> String {
    match code {
        Some(code) => format!("[{code}] {message}"),
        None => message.to_string(),
    }
}

impl From<std::io::Error> for RawError {
    fn from(error: std::io::Error) -> Self {
        RawError::coded("local/io", error.to_string())
    }
}

/// A raw error mapped onto the engine taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{context}: {message} ({kind})")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    /// User-presentable message
    pub message: String,
    pub retryable: bool,
    /// Operation that produced the error (e.g. `chunk-3`, `acquire-video`)
    pub context: String,
    #[source]
    pub source: RawError,
}

impl ClassifiedError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        retryable: bool,
        context: impl Into<String>,
        source: RawError,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            context: context.into(),
            source,
        }
    }

    /// Shorthand for a non-retryable invalid-input error raised by the engine itself
    pub fn invalid_input(context: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            ErrorKind::InvalidInput,
            message.clone(),
            false,
            context,
            RawError::coded("engine/invalid-input", message),
        )
    }

    /// Returns the same error tagged with a different context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// Error response for frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&ClassifiedError> for ErrorResponse {
    fn from(error: &ClassifiedError) -> Self {
        ErrorResponse {
            code: error.kind.code().to_string(),
            message: error.message.clone(),
            retryable: error.retryable,
        }
    }
}

impl From<ClassifiedError> for ErrorResponse {
    fn from(error: ClassifiedError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Shared slot holding the most recent classified error surfaced to the UI
#[derive(Debug, Clone, Default)]
pub struct LastError {
    slot: Arc<Mutex<Option<ClassifiedError>>>,
}

impl LastError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: &ClassifiedError) {
        *self.slot.lock() = Some(error.clone());
    }

    pub fn get(&self) -> Option<ClassifiedError> {
        self.slot.lock().clone()
    }

    pub fn clear(&self) {
        self.slot.lock().take();
    }
}

/// Result type alias using ClassifiedError
pub type EngineResult<T> = Result<T, ClassifiedError>;
