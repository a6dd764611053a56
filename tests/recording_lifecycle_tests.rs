//! Recording state machine lifecycle under virtual time.

mod common;

use capture_relay::capture::synthetic::SyntheticTrack;
use capture_relay::capture::{MediaTrack, TrackKind};
use capture_relay::config::RecorderSettings;
use capture_relay::recorder::synthetic::{RecorderBehavior, SyntheticRecorderFactory};
use capture_relay::recorder::SegmentSink;
use capture_relay::{
    CaptureMode, CaptureStream, CleanupCoordinator, ErrorKind, HardwareRegistry, OwnerGuard, RawError,
    RecordingEvent, RecordingState, RecordingStateMachine,
};
use common::{drain, wait_for, wait_started};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    machine: RecordingStateMachine,
    factory: Arc<SyntheticRecorderFactory>,
    registry: HardwareRegistry,
    stream: CaptureStream,
}

fn settings() -> RecorderSettings {
    RecorderSettings {
        countdown_secs: 1,
        timeslice_ms: 1_000,
        ..RecorderSettings::default()
    }
}

fn rig_with(factory: SyntheticRecorderFactory, settings: RecorderSettings) -> Rig {
    let registry = HardwareRegistry::tracking();
    let factory = Arc::new(factory);
    let machine = RecordingStateMachine::new(
        factory.clone(),
        settings,
        CleanupCoordinator::new(OwnerGuard::new()),
    );
    let tracks: Vec<Arc<dyn MediaTrack>> = vec![
        Arc::new(SyntheticTrack::new(TrackKind::Audio, "mic-builtin")),
        Arc::new(SyntheticTrack::new(TrackKind::Video, "cam-builtin")),
    ];
    let stream = CaptureStream::new(CaptureMode::Video, tracks, registry.clone());
    machine.attach_stream(stream.clone()).expect("stream attaches");
    Rig {
        machine,
        factory,
        registry,
        stream,
    }
}

fn rig(behavior: RecorderBehavior) -> Rig {
    rig_with(SyntheticRecorderFactory::new().with_behavior(behavior), settings())
}

fn stopped_count(events: &[RecordingEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, RecordingEvent::Stopped(_)))
        .count()
}

#[derive(Default)]
struct CollectingSink {
    segments: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl SegmentSink for CollectingSink {
    fn accept(&self, index: u32, data: Arc<Vec<u8>>) {
        self.segments.lock().push((index, data.to_vec()));
    }
}

#[tokio::test(start_paused = true)]
async fn full_lifecycle_finalizes_exactly_once() {
    let rig = rig(RecorderBehavior {
        final_segment: b"-final".to_vec(),
        stop_signals: 2,
        generated_segment: None,
    });
    let mut events = rig.machine.subscribe();

    rig.machine.start().expect("start");
    assert_eq!(rig.machine.state(), RecordingState::Countdown);
    wait_started(&mut events).await;
    assert_eq!(rig.machine.state(), RecordingState::Recording);

    let recorder = rig.factory.last_recorder().expect("recorder created");
    assert_eq!(recorder.mime_type(), "video/webm;codecs=vp9,opus");
    recorder.emit_data(b"one".to_vec());
    wait_for(&mut events, |event| matches!(event, RecordingEvent::ChunkCaptured { index: 0, .. })).await;

    rig.machine.pause().expect("pause");
    assert_eq!(rig.machine.state(), RecordingState::Paused);
    assert!(recorder.is_paused());

    rig.machine.resume().expect("resume");
    assert_eq!(rig.machine.state(), RecordingState::Countdown);
    wait_for(&mut events, |event| matches!(event, RecordingEvent::Resumed)).await;
    assert!(recorder.is_recording());

    recorder.emit_data(b"-two".to_vec());
    rig.machine.done().expect("done");
    assert_eq!(rig.machine.state(), RecordingState::Stopping);

    let artifact = match wait_for(&mut events, |event| matches!(event, RecordingEvent::Stopped(_))).await {
        RecordingEvent::Stopped(artifact) => artifact,
        other => panic!("unexpected event {other:?}"),
    };
    assert_eq!(artifact.data, b"one-two-final".to_vec());
    assert_eq!(artifact.chunk_count, 3);

    // Let the second stop signal, the grace release and the watchdog all fire
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(stopped_count(&drain(&mut events)), 0);
    assert_eq!(rig.machine.state(), RecordingState::Stopped);
    assert_eq!(rig.registry.release_count(rig.stream.id()), 1);
    assert_eq!(recorder.stop_calls(), 1);
    assert!(rig.machine.artifact().is_some_and(|stored| Arc::ptr_eq(&stored, &artifact)));
}

#[tokio::test(start_paused = true)]
async fn repeated_done_is_a_no_op() {
    let rig = rig(RecorderBehavior::default());
    let mut events = rig.machine.subscribe();
    rig.machine.start().expect("start");
    wait_started(&mut events).await;

    rig.machine.done().expect("first done");
    rig.machine.done().expect("second done");
    wait_for(&mut events, |event| matches!(event, RecordingEvent::Stopped(_))).await;
    rig.machine.done().expect("done after stop");

    tokio::time::sleep(Duration::from_secs(10)).await;
    let recorder = rig.factory.last_recorder().expect("recorder");
    assert_eq!(recorder.stop_calls(), 1);
    assert_eq!(rig.registry.release_count(rig.stream.id()), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_while_recording_discards_without_finalizing() {
    let rig = rig(RecorderBehavior::default());
    let mut events = rig.machine.subscribe();
    rig.machine.start().expect("start");
    wait_started(&mut events).await;

    rig.machine.reset();
    assert_eq!(rig.machine.state(), RecordingState::Idle);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let seen = drain(&mut events);
    assert_eq!(stopped_count(&seen), 0);
    assert!(seen.iter().any(|event| matches!(event, RecordingEvent::Reset)));
    assert!(rig.stream.is_released());
    assert_eq!(rig.registry.release_count(rig.stream.id()), 1);
    assert!(rig.machine.artifact().is_none());
    assert!(rig.machine.stream().is_none());
}

#[tokio::test(start_paused = true)]
async fn reset_before_start_releases_stream_immediately() {
    let rig = rig(RecorderBehavior::default());

    rig.machine.reset();

    assert!(rig.stream.is_released());
    assert_eq!(rig.registry.release_count(rig.stream.id()), 1);
    assert_eq!(rig.machine.state(), RecordingState::Idle);
}

#[tokio::test(start_paused = true)]
async fn done_during_initial_countdown_cancels_back_to_ready() {
    let rig = rig_with(
        SyntheticRecorderFactory::new(),
        RecorderSettings {
            countdown_secs: 3,
            ..settings()
        },
    );
    let mut events = rig.machine.subscribe();
    rig.machine.start().expect("start");
    wait_for(&mut events, |event| matches!(event, RecordingEvent::CountdownTick(3))).await;

    rig.machine.done().expect("cancel countdown");
    assert_eq!(rig.machine.state(), RecordingState::Ready);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let seen = drain(&mut events);
    assert!(seen.iter().any(|event| matches!(event, RecordingEvent::CountdownCancelled)));
    assert!(!seen.iter().any(|event| matches!(event, RecordingEvent::Started { .. })));
    assert!(rig.factory.recorders().is_empty());
    assert!(rig.stream.is_active());

    // The stream is still attached, so recording can start again
    rig.machine.start().expect("restart");
    wait_started(&mut events).await;
}

#[tokio::test(start_paused = true)]
async fn chunk_indices_are_sequential_and_empty_segments_skipped() {
    let rig = rig(RecorderBehavior::default());
    let sink = Arc::new(CollectingSink::default());
    let as_sink: Arc<dyn SegmentSink> = sink.clone();
    rig.machine.set_segment_sink(Some(as_sink));
    let mut events = rig.machine.subscribe();
    rig.machine.start().expect("start");
    wait_started(&mut events).await;

    let recorder = rig.factory.last_recorder().expect("recorder");
    recorder.emit_data(b"a".to_vec());
    recorder.emit_data(Vec::new());
    recorder.emit_data(b"bb".to_vec());
    rig.machine.done().expect("done");
    wait_for(&mut events, |event| matches!(event, RecordingEvent::Stopped(_))).await;

    let segments = sink.segments.lock().clone();
    let indices: Vec<u32> = segments.iter().map(|(index, _)| *index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(segments[1].1, b"bb".to_vec());
    assert_eq!(segments[2].1, b"final-segment".to_vec());
    assert_eq!(rig.machine.snapshot().chunk_count, 3);
}

#[tokio::test(start_paused = true)]
async fn silent_recorder_is_released_after_grace_and_finalized_by_watchdog() {
    let rig = rig(RecorderBehavior {
        final_segment: Vec::new(),
        stop_signals: 0,
        generated_segment: None,
    });
    let mut events = rig.machine.subscribe();
    rig.machine.start().expect("start");
    wait_started(&mut events).await;
    rig.factory.last_recorder().expect("recorder").emit_data(b"only".to_vec());
    wait_for(&mut events, |event| matches!(event, RecordingEvent::ChunkCaptured { .. })).await;

    rig.machine.done().expect("done");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rig.stream.is_active());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(rig.stream.is_released());
    assert_eq!(rig.machine.state(), RecordingState::Stopping);

    let event = wait_for(&mut events, |event| matches!(event, RecordingEvent::Stopped(_))).await;
    let RecordingEvent::Stopped(artifact) = event else {
        panic!("expected the stopped event");
    };
    assert_eq!(artifact.data, b"only".to_vec());
    assert_eq!(rig.machine.state(), RecordingState::Stopped);
    assert_eq!(rig.registry.release_count(rig.stream.id()), 1);
}

#[tokio::test(start_paused = true)]
async fn maximum_duration_stops_automatically() {
    let rig = rig_with(
        SyntheticRecorderFactory::new(),
        RecorderSettings {
            max_duration_secs: Some(2),
            ..settings()
        },
    );
    let mut events = rig.machine.subscribe();
    rig.machine.start().expect("start");
    wait_started(&mut events).await;

    let event = wait_for(&mut events, |event| matches!(event, RecordingEvent::Stopped(_))).await;
    let RecordingEvent::Stopped(artifact) = event else {
        panic!("expected the stopped event");
    };
    assert!(artifact.duration_ms >= 2_000, "duration {}", artifact.duration_ms);
    assert!(artifact.duration_ms < 3_000, "duration {}", artifact.duration_ms);
}

#[tokio::test(start_paused = true)]
async fn progress_is_reported_while_recording() {
    let rig = rig(RecorderBehavior::default());
    let mut events = rig.machine.subscribe();
    rig.machine.start().expect("start");
    wait_started(&mut events).await;

    let event = wait_for(&mut events, |event| matches!(event, RecordingEvent::Progress(_))).await;
    assert!(matches!(event, RecordingEvent::Progress(ms) if ms >= 1_000));
    assert!(rig.machine.snapshot().is_recording);
}

#[tokio::test(start_paused = true)]
async fn teardown_releases_hardware_and_blocks_commands() {
    let rig = rig(RecorderBehavior::default());
    let mut events = rig.machine.subscribe();
    rig.machine.start().expect("start");
    wait_started(&mut events).await;

    rig.machine.teardown();
    rig.machine.teardown();

    assert!(rig.stream.is_released());
    assert_eq!(rig.registry.release_count(rig.stream.id()), 1);
    assert!(rig.machine.done().is_err());
    assert!(rig.machine.start().is_err());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(stopped_count(&drain(&mut events)), 0);
    assert_eq!(rig.factory.last_recorder().expect("recorder").stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unsupported_formats_are_rejected_before_countdown() {
    let rig = rig_with(SyntheticRecorderFactory::supporting(&["audio/x-unheard-of"]), settings());

    let error = rig.machine.start().expect_err("no supported format");

    assert_eq!(error.kind, ErrorKind::InvalidInput);
    assert_eq!(rig.machine.state(), RecordingState::Ready);
}

#[tokio::test(start_paused = true)]
async fn recorder_creation_failure_returns_to_ready() {
    let rig = rig(RecorderBehavior::default());
    rig.factory
        .fail_next_create(RawError::coded("NotSupportedError", "encoder missing"));
    let mut events = rig.machine.subscribe();

    rig.machine.start().expect("countdown starts");
    let event = wait_for(&mut events, |event| matches!(event, RecordingEvent::Error(_))).await;

    let RecordingEvent::Error(error) = event else {
        panic!("expected an error event");
    };
    assert_eq!(error.context, "start-recorder");
    assert_eq!(rig.machine.state(), RecordingState::Ready);
    assert!(rig.stream.is_active());
}

#[tokio::test(start_paused = true)]
async fn recorder_error_stops_the_recording() {
    let rig = rig(RecorderBehavior::default());
    let mut events = rig.machine.subscribe();
    rig.machine.start().expect("start");
    wait_started(&mut events).await;

    rig.factory
        .last_recorder()
        .expect("recorder")
        .emit_error(RawError::message("encoder crashed"));

    wait_for(&mut events, |event| matches!(event, RecordingEvent::Error(_))).await;
    wait_for(&mut events, |event| matches!(event, RecordingEvent::Stopped(_))).await;
    assert_eq!(rig.machine.state(), RecordingState::Stopped);
    assert!(rig.stream.is_released());
}

#[tokio::test(start_paused = true)]
async fn invalid_transitions_are_rejected() {
    let rig = rig(RecorderBehavior::default());

    assert!(rig.machine.pause().is_err());
    assert!(rig.machine.resume().is_err());

    let released = rig.stream.clone();
    released.release("test");
    let error = rig.machine.start().expect_err("stream is gone");
    assert_eq!(error.kind, ErrorKind::InvalidInput);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn countdown_cancelled_during_recorder_creation_stays_cancelled() {
    let rig = rig_with(
        SyntheticRecorderFactory::new(),
        RecorderSettings {
            countdown_secs: 0,
            ..settings()
        },
    );
    rig.factory.set_create_delay(Some(Duration::from_millis(300)));
    let mut events = rig.machine.subscribe();

    rig.machine.start().expect("start");
    tokio::time::sleep(Duration::from_millis(100)).await;
    rig.machine.done().expect("cancel countdown");
    assert_eq!(rig.machine.state(), RecordingState::Ready);

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(rig.machine.state(), RecordingState::Ready);
    let recorder = rig.factory.last_recorder().expect("recorder was created");
    assert_eq!(recorder.stop_calls(), 1);
    assert!(!recorder.is_recording());
    let seen = drain(&mut events);
    assert!(seen.iter().any(|event| matches!(event, RecordingEvent::CountdownCancelled)));
    assert!(!seen.iter().any(|event| matches!(event, RecordingEvent::Started { .. })));
    assert!(rig.stream.is_active());
}
