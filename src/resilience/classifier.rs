//! Error classification
//!
//! Maps backend codes and platform error names onto the [`ErrorKind`]
//! taxonomy. Classification is a pure lookup: it never fails and never logs.

use crate::capture::CaptureMode;
use crate::utils::error::{ClassifiedError, ErrorKind, RawError};

const NETWORK_KEYWORDS: &[&str] = &[
    "network",
    "fetch",
    "offline",
    "connection",
    "socket",
    "unreachable",
];
const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out", "deadline"];
const QUOTA_KEYWORDS: &[&str] = &["quota", "rate limit", "too many requests", "resource exhausted"];

/// Classifies a raw backend or platform error
pub fn classify(error: &RawError, context: &str) -> ClassifiedError {
    let (kind, retryable, message) = error
        .code
        .as_deref()
        .and_then(lookup_code)
        .or_else(|| match_message(&error.message))
        .unwrap_or((
            ErrorKind::Unknown,
            true,
            "Something went wrong. Please try again.",
        ));

    ClassifiedError::new(kind, message, retryable, context, error.clone())
}

/// Classifies a capture-device failure with guidance naming the device
pub fn classify_capture_error(error: &RawError, mode: CaptureMode, context: &str) -> ClassifiedError {
    let device = match mode {
        CaptureMode::Audio => "microphone",
        CaptureMode::Video => "camera and microphone",
    };

    let (kind, retryable, message) = match error.code.as_deref() {
        Some("NotAllowedError") | Some("PermissionDeniedError") => (
            ErrorKind::PermissionDenied,
            false,
            format!("Access to your {device} was denied. Please allow access in your browser or system settings and try again."),
        ),
        Some("NotFoundError") | Some("DevicesNotFoundError") => (
            ErrorKind::InvalidInput,
            false,
            format!("No {device} was found. Please connect a device and try again."),
        ),
        Some("NotReadableError") | Some("TrackStartError") => (
            ErrorKind::Unknown,
            true,
            format!("Your {device} is in use by another application. Close other apps using it and try again."),
        ),
        Some("OverconstrainedError") | Some("ConstraintNotSatisfiedError") => (
            ErrorKind::InvalidInput,
            false,
            format!("Your {device} does not support the requested settings. Try selecting a different device."),
        ),
        Some("SecurityError") => (
            ErrorKind::PermissionDenied,
            false,
            format!("Access to your {device} is blocked by security settings. Make sure the page is served over a secure connection."),
        ),
        Some("TimeoutError") => (
            ErrorKind::Timeout,
            true,
            format!("Timed out waiting for {device} access. Please respond to the permission prompt and try again."),
        ),
        Some("AbortError") => (
            ErrorKind::Unknown,
            true,
            format!("Starting your {device} was interrupted. Please try again."),
        ),
        _ => return classify(error, context),
    };

    ClassifiedError::new(kind, message, retryable, context, error.clone())
}

fn lookup_code(code: &str) -> Option<(ErrorKind, bool, &'static str)> {
    let (namespace, name) = match code.split_once('/') {
        Some((namespace, name)) => (namespace, name),
        // Bare gRPC-style codes come from the document store
        None => ("firestore", code),
    };

    match namespace {
        "auth" => lookup_auth(name),
        "storage" => lookup_storage(name),
        "firestore" | "functions" => lookup_rpc(name),
        _ => None,
    }
}

fn lookup_auth(name: &str) -> Option<(ErrorKind, bool, &'static str)> {
    let entry = match name {
        "network-request-failed" => (
            ErrorKind::Network,
            true,
            "Network error while signing in. Check your connection.",
        ),
        "timeout" => (ErrorKind::Timeout, true, "Signing in timed out. Please try again."),
        "too-many-requests" => (
            ErrorKind::QuotaExceeded,
            false,
            "Too many attempts. Please wait a few minutes before trying again.",
        ),
        "operation-not-allowed" | "admin-restricted-operation" | "user-disabled" => (
            ErrorKind::PermissionDenied,
            false,
            "Sign-in is not allowed for this session.",
        ),
        "user-token-expired" | "invalid-user-token" | "requires-recent-login" => (
            ErrorKind::PermissionDenied,
            false,
            "Your session has expired. Please reload the page.",
        ),
        "invalid-credential" | "invalid-api-key" | "app-not-authorized" => (
            ErrorKind::PermissionDenied,
            false,
            "This app is not authorized to upload recordings.",
        ),
        "internal-error" => (
            ErrorKind::Unknown,
            true,
            "Sign-in failed unexpectedly. Please try again.",
        ),
        _ => return None,
    };
    Some(entry)
}

fn lookup_storage(name: &str) -> Option<(ErrorKind, bool, &'static str)> {
    let entry = match name {
        "retry-limit-exceeded" => (
            ErrorKind::Timeout,
            true,
            "The upload took too long. Please try again.",
        ),
        "server-file-wrong-size" | "invalid-checksum" => (
            ErrorKind::Network,
            true,
            "The upload was corrupted in transit. Retrying may help.",
        ),
        "quota-exceeded" => (
            ErrorKind::QuotaExceeded,
            false,
            "Storage quota exceeded. Please contact support.",
        ),
        "unauthenticated" | "unauthorized" => (
            ErrorKind::PermissionDenied,
            false,
            "You do not have permission to upload this recording.",
        ),
        "invalid-argument" | "invalid-format" | "invalid-url" | "no-default-bucket"
        | "object-not-found" | "bucket-not-found" | "project-not-found" => (
            ErrorKind::InvalidInput,
            false,
            "The upload request was invalid.",
        ),
        "canceled" => (ErrorKind::Unknown, false, "The upload was canceled."),
        "unknown" => (
            ErrorKind::Unknown,
            true,
            "An unknown storage error occurred. Please try again.",
        ),
        _ => return None,
    };
    Some(entry)
}

fn lookup_rpc(name: &str) -> Option<(ErrorKind, bool, &'static str)> {
    let entry = match name {
        "unavailable" | "aborted" => (
            ErrorKind::Network,
            true,
            "The service is temporarily unavailable. Please try again.",
        ),
        "deadline-exceeded" => (
            ErrorKind::Timeout,
            true,
            "The request timed out. Please try again.",
        ),
        "resource-exhausted" => (
            ErrorKind::QuotaExceeded,
            false,
            "Service limits reached. Please try again later.",
        ),
        "permission-denied" | "unauthenticated" => (
            ErrorKind::PermissionDenied,
            false,
            "You do not have permission to perform this action.",
        ),
        "invalid-argument" | "not-found" | "already-exists" | "failed-precondition"
        | "out-of-range" => (
            ErrorKind::InvalidInput,
            false,
            "The request was rejected as invalid.",
        ),
        "internal" | "unknown" | "data-loss" => (
            ErrorKind::Unknown,
            true,
            "The service reported an internal error. Please try again.",
        ),
        "cancelled" => (ErrorKind::Unknown, false, "The request was cancelled."),
        _ => return None,
    };
    Some(entry)
}

fn match_message(message: &str) -> Option<(ErrorKind, bool, &'static str)> {
    let lowered = message.to_ascii_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    if contains_any(TIMEOUT_KEYWORDS) {
        return Some((
            ErrorKind::Timeout,
            true,
            "The request timed out. Please try again.",
        ));
    }
    if contains_any(QUOTA_KEYWORDS) {
        return Some((
            ErrorKind::QuotaExceeded,
            false,
            "Usage limits reached. Please try again later.",
        ));
    }
    if contains_any(NETWORK_KEYWORDS) {
        return Some((
            ErrorKind::Network,
            true,
            "Network error. Check your connection and try again.",
        ));
    }
    None
}
