//! Capture Relay demo binary
//!
//! Runs one synthetic, local-only recording session and stores the artifact
//! through the filesystem store.
//!
//! Usage: `capture-relay [audio|video] [seconds] [config.json]`

use anyhow::{bail, Context, Result};
use capture_relay::capture::synthetic::SyntheticCaptureBackend;
use capture_relay::recorder::synthetic::{RecorderBehavior, SyntheticRecorderFactory};
use capture_relay::upload::{FsLocalStore, OfflineBackend};
use capture_relay::{init_tracing, CaptureMode, EngineConfig, EngineDeps, HardwareRegistry, RecordingEngine};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mode = match args.first().map(String::as_str) {
        None | Some("audio") => CaptureMode::Audio,
        Some("video") => CaptureMode::Video,
        Some(other) => bail!("unknown capture mode {other:?}, expected audio or video"),
    };
    let seconds: u64 = match args.get(1) {
        Some(raw) => raw.parse().with_context(|| format!("invalid duration {raw:?}"))?,
        None => 3,
    };
    let mut config = match args.get(2) {
        Some(path) => EngineConfig::load(Path::new(path)).with_context(|| format!("loading {path}"))?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides();
    // The demo has no remote backend
    config.flags.backend_enabled = false;
    config.recorder.timeslice_ms = config.recorder.timeslice_ms.min(1_000);
    config.validate()?;

    init_tracing(&config.flags);
    tracing::info!("Starting Capture Relay demo v{}", env!("CARGO_PKG_VERSION"));

    let registry = if config.capture.track_hardware {
        HardwareRegistry::tracking()
    } else {
        HardwareRegistry::disabled()
    };
    let recorders = SyntheticRecorderFactory::new().with_behavior(RecorderBehavior {
        generated_segment: Some(vec![0u8; 4_096]),
        ..RecorderBehavior::default()
    });
    let deps = EngineDeps {
        capture: Arc::new(SyntheticCaptureBackend::with_default_devices()),
        recorders: Arc::new(recorders),
        remote: Arc::new(OfflineBackend),
        local: Arc::new(FsLocalStore::new(config.upload.local_dir.clone())),
        registry: registry.clone(),
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let countdown = u64::from(config.recorder.countdown_secs);
    let engine = RecordingEngine::new(session_id, config, deps);

    match mode {
        CaptureMode::Audio => engine.acquire_audio().await?,
        CaptureMode::Video => engine.acquire_video().await?,
    }
    engine.start()?;
    tokio::time::sleep(Duration::from_secs(countdown + seconds)).await;

    let artifact = engine.done().await?;
    println!(
        "Recorded {} bytes of {} in {} chunks ({}ms)",
        artifact.size(),
        artifact.mime_type,
        artifact.chunk_count,
        artifact.duration_ms
    );

    let receipt = engine.upload_recording().await?;
    println!("Stored at {} via {:?}", receipt.path, receipt.route);

    engine.shutdown();
    if registry.is_tracking() {
        println!(
            "Hardware: {} streams acquired, {} released",
            registry.acquired_total(),
            registry.released_total()
        );
    }
    Ok(())
}
