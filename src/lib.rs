//! Capture Relay - recording lifecycle and upload resilience.
//!
//! This is the main library crate. It owns the capture stream, drives the
//! platform recorder through its lifecycle and delivers the result to a
//! remote backend, falling back to local storage when the network fails.

pub mod capture;
pub mod cleanup;
pub mod config;
pub mod engine;
pub mod recorder;
pub mod resilience;
pub mod upload;
pub mod utils;

pub use capture::{CaptureMode, CaptureStream, HardwareRegistry, MediaCaptureController};
pub use cleanup::{CleanupCoordinator, OwnerGuard};
pub use config::{EngineConfig, FeatureFlags};
pub use engine::{EngineDeps, EngineSnapshot, RecordingEngine, UploadReceipt};
pub use recorder::{RecordedArtifact, RecordingEvent, RecordingState, RecordingStateMachine};
pub use resilience::{classify, FallbackRouter, RetryExecutor, RetryOptions};
pub use upload::{ChunkManifest, ChunkUploadPipeline};
pub use utils::{ClassifiedError, EngineResult, ErrorKind, ErrorResponse, RawError};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` wins when set. Calling this more than once is harmless.
pub fn init_tracing(flags: &FeatureFlags) {
    let default_filter = if flags.debug_logging {
        "capture_relay=debug"
    } else {
        "capture_relay=info"
    };

    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_ok() {
        tracing::debug!("Tracing initialized ({})", default_filter);
    }
}
