//! Failure handling shared by capture and upload
//!
//! - Error classification onto the engine taxonomy
//! - Bounded retry with exponential backoff
//! - Remote-first routing with a local fallback

pub mod classifier;
pub mod fallback;
pub mod retry;

pub use classifier::{classify, classify_capture_error};
pub use fallback::{FallbackRouter, Route, Routed};
pub use retry::{RetryExecutor, RetryOptions, UploadAttempt};
