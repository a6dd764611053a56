//! Shared utilities

pub mod error;

pub use error::{ClassifiedError, EngineResult, ErrorKind, ErrorResponse, LastError, RawError};
