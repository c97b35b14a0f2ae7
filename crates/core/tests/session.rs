use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use reverser_core::testing::{FakeAsset, FakeMedia, SinkEvent};
use reverser_core::{
    FrameRate, OutputRate, PartialOutputPolicy, ReverseConfig, ReverseError, ReverseSession,
    SessionResult, SessionStatus,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn output(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("reversed.mp4")
}

fn start(session: &mut ReverseSession<FakeAsset>) -> mpsc::Receiver<SessionResult> {
    let (tx, rx) = mpsc::channel();
    session.start(move |result| {
        tx.send(result).unwrap();
    });
    rx
}

#[test]
fn completes_with_reversed_frames() {
    let dir = tempfile::tempdir().unwrap();
    let asset = FakeAsset::new(FakeMedia::new(99, 30));
    let recorder = asset.recorder();
    let mut session = ReverseSession::new(asset, output(&dir));
    assert_eq!(session.status(), SessionStatus::Idle);

    let rx = start(&mut session);
    let artifact = rx.recv_timeout(TIMEOUT).unwrap().unwrap();

    assert_eq!(artifact.path, output(&dir));
    assert_eq!(artifact.frames, 99);
    assert_eq!(artifact.duration, Duration::from_millis(3300));
    assert_eq!(session.status(), SessionStatus::Completed);
    assert_eq!(session.error(), None);

    let indices: Vec<u32> = recorder.appended().iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (0..99).rev().collect::<Vec<_>>());
    assert_eq!(recorder.windows().len(), 4);
    assert_eq!(
        std::fs::read_to_string(output(&dir)).unwrap(),
        "99 frames"
    );
}

#[test]
fn blocking_reverse_returns_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let session = ReverseSession::new(FakeAsset::new(FakeMedia::new(12, 24)), output(&dir));
    let artifact = session.reverse_blocking().unwrap();
    assert_eq!(artifact.frames, 12);
    assert_eq!(artifact.duration, Duration::from_millis(400));
}

#[test]
fn completion_fires_once_and_late_cancel_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let mut session = ReverseSession::new(FakeAsset::new(FakeMedia::new(20, 30)), output(&dir));

    let counter = calls.clone();
    session.start(move |result| {
        counter.fetch_add(1, Ordering::SeqCst);
        tx.send(result).unwrap();
    });
    assert!(rx.recv_timeout(TIMEOUT).unwrap().is_ok());

    session.cancel();
    session.cancel();
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.status(), SessionStatus::Completed);
    assert!(output(&dir).exists());
}

#[test]
#[should_panic(expected = "started twice")]
fn starting_twice_panics() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = ReverseSession::new(FakeAsset::new(FakeMedia::new(5, 30)), output(&dir));
    session.start(|_| {});
    session.start(|_| {});
}

#[test]
fn cancel_during_metadata_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut media = FakeMedia::new(30, 30);
    media.hold_metadata = true;
    let asset = FakeAsset::new(media);
    let recorder = asset.recorder();
    let mut session = ReverseSession::new(asset, output(&dir));

    let rx = start(&mut session);
    session.cancel();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Err(ReverseError::Cancelled));
    assert_eq!(session.status(), SessionStatus::Cancelled);
    assert_eq!(session.error(), None);
    assert_eq!(recorder.sources_opened(), 0);
    assert_eq!(recorder.sinks_opened(), 0);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn cancel_mid_stream_stops_writing_and_removes_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut media = FakeMedia::new(90, 30);
    media.sink.stall_after = Some(10);
    let asset = FakeAsset::new(media);
    let recorder = asset.recorder();
    let mut session = ReverseSession::new(asset, output(&dir));

    let rx = start(&mut session);
    assert!(recorder.wait_for_appends(10, TIMEOUT));
    assert_eq!(session.status(), SessionStatus::Executing);
    session.cancel();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Err(ReverseError::Cancelled));
    assert_eq!(session.status(), SessionStatus::Cancelled);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(recorder.appended().len(), 10);
    assert!(recorder.events().contains(&SinkEvent::Cancelled));
    assert!(!output(&dir).exists());
}

#[test]
fn cancelled_output_is_kept_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let mut media = FakeMedia::new(90, 30);
    media.sink.stall_after = Some(3);
    let asset = FakeAsset::new(media);
    let recorder = asset.recorder();
    let config = ReverseConfig {
        partial_output: PartialOutputPolicy::Keep,
        ..ReverseConfig::default()
    };
    let mut session = ReverseSession::with_config(asset, output(&dir), config);

    let rx = start(&mut session);
    assert!(recorder.wait_for_appends(3, TIMEOUT));
    session.cancel();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Err(ReverseError::Cancelled));
    assert!(output(&dir).exists());
}

#[test]
fn dropping_a_running_session_cancels_it() {
    let dir = tempfile::tempdir().unwrap();
    let mut media = FakeMedia::new(90, 30);
    media.sink.stall_after = Some(1);
    let asset = FakeAsset::new(media);
    let recorder = asset.recorder();
    let mut session = ReverseSession::new(asset, output(&dir));

    let rx = start(&mut session);
    assert!(recorder.wait_for_appends(1, TIMEOUT));
    drop(session);

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Err(ReverseError::Cancelled));
}

#[test]
fn cancel_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let asset = FakeAsset::new(FakeMedia::new(30, 30));
    let recorder = asset.recorder();
    let mut session = ReverseSession::new(asset, output(&dir));

    session.cancel();
    assert_eq!(session.status(), SessionStatus::Cancelled);

    let rx = start(&mut session);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Err(ReverseError::Cancelled));
    assert_eq!(recorder.metadata_loads(), 0);
}

#[test]
fn write_failure_fails_session_and_removes_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut media = FakeMedia::new(60, 30);
    media.sink.fail_after = Some(7);
    let mut session = ReverseSession::new(FakeAsset::new(media), output(&dir));

    let rx = start(&mut session);
    let err = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();

    assert!(matches!(err, ReverseError::WriteFailed(_)));
    assert_eq!(session.status(), SessionStatus::Failed);
    assert_eq!(session.error(), Some(err));
    assert!(!output(&dir).exists());
}

#[test]
fn read_failure_fails_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut media = FakeMedia::new(60, 30);
    media.fail_read_at_window = Some(1);
    let mut session = ReverseSession::new(FakeAsset::new(media), output(&dir));

    let rx = start(&mut session);
    let err = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
    assert!(matches!(err, ReverseError::ReadFailed(_)));
    assert_eq!(session.status(), SessionStatus::Failed);
}

#[test]
fn trackless_asset_fails_without_opening_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut media = FakeMedia::new(30, 30);
    media.has_video = false;
    let asset = FakeAsset::new(media);
    let recorder = asset.recorder();
    let mut session = ReverseSession::new(asset, output(&dir));

    let rx = start(&mut session);
    assert_eq!(
        rx.recv_timeout(TIMEOUT).unwrap(),
        Err(ReverseError::NoReadableTrack)
    );
    assert_eq!(session.error(), Some(ReverseError::NoReadableTrack));
    assert_eq!(recorder.sinks_opened(), 0);
    assert!(!output(&dir).exists());
}

#[test]
fn zero_duration_asset_fails_with_nothing_to_read() {
    let dir = tempfile::tempdir().unwrap();
    let mut media = FakeMedia::new(0, 30);
    media.duration = Some(Duration::ZERO);
    let mut session = ReverseSession::new(FakeAsset::new(media), output(&dir));

    let rx = start(&mut session);
    assert_eq!(
        rx.recv_timeout(TIMEOUT).unwrap(),
        Err(ReverseError::NothingToRead)
    );
    assert!(!output(&dir).exists());
}

#[test]
fn attach_and_metadata_errors_fail_the_session() {
    let cases = [
        {
            let mut m = FakeMedia::new(10, 30);
            m.metadata_error = Some(ReverseError::MetadataLoadFailed("unreadable".into()));
            (m, ReverseError::MetadataLoadFailed("unreadable".into()))
        },
        {
            let mut m = FakeMedia::new(10, 30);
            m.source_attach_error = Some("no decoder".into());
            (m, ReverseError::SourceAttachFailed("no decoder".into()))
        },
        {
            let mut m = FakeMedia::new(10, 30);
            m.sink_attach_error = Some("no encoder".into());
            (m, ReverseError::SinkAttachFailed("no encoder".into()))
        },
    ];

    for (media, expected) in cases {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ReverseSession::new(FakeAsset::new(media), output(&dir));
        let rx = start(&mut session);
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Err(expected.clone()));
        assert_eq!(session.status(), SessionStatus::Failed);
        assert_eq!(session.error(), Some(expected));
    }
}

#[test]
fn unwritable_output_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("out.mp4");
    let mut session = ReverseSession::new(FakeAsset::new(FakeMedia::new(10, 30)), path);

    let rx = start(&mut session);
    let err = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();
    assert!(matches!(err, ReverseError::OutputPathUnwritable { .. }));
}

#[test]
fn existing_output_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(output(&dir), "stale").unwrap();
    let session = ReverseSession::new(FakeAsset::new(FakeMedia::new(15, 30)), output(&dir));

    session.reverse_blocking().unwrap();
    assert_eq!(
        std::fs::read_to_string(output(&dir)).unwrap(),
        "15 frames"
    );
}

#[test]
fn output_rate_defaults_to_fixed_and_can_follow_source() {
    let dir = tempfile::tempdir().unwrap();
    let asset = FakeAsset::new(FakeMedia::new(25, 25));
    let recorder = asset.recorder();
    ReverseSession::new(asset, output(&dir))
        .reverse_blocking()
        .unwrap();
    assert_eq!(
        recorder.sink_settings().unwrap().frame_rate,
        FrameRate::new(30, 1)
    );
    assert!(recorder.appended().iter().all(|(_, ts)| ts.timescale == 30));

    let asset = FakeAsset::new(FakeMedia::new(25, 25));
    let recorder = asset.recorder();
    let config = ReverseConfig {
        output_rate: OutputRate::MatchSource,
        ..ReverseConfig::default()
    };
    let artifact = ReverseSession::with_config(asset, output(&dir), config)
        .reverse_blocking()
        .unwrap();
    assert_eq!(
        recorder.sink_settings().unwrap().frame_rate,
        FrameRate::new(25, 1)
    );
    assert_eq!(artifact.duration, Duration::from_secs(1));
}

fn assert_rejects_config(config: ReverseConfig) {
    let dir = tempfile::tempdir().unwrap();
    let asset = FakeAsset::new(FakeMedia::new(30, 30));
    let recorder = asset.recorder();
    let mut session = ReverseSession::with_config(asset, output(&dir), config);

    let rx = start(&mut session);
    let err = rx.recv_timeout(TIMEOUT).unwrap().unwrap_err();

    assert!(matches!(err, ReverseError::InvalidConfig(_)), "{err:?}");
    assert_eq!(session.status(), SessionStatus::Failed);
    assert_eq!(session.error(), Some(err));
    assert_eq!(recorder.metadata_loads(), 0);
    assert!(!output(&dir).exists());
}

#[test]
fn negative_read_step_fails_instead_of_hanging() {
    assert_rejects_config(ReverseConfig {
        read_step_secs: -1.0,
        ..ReverseConfig::default()
    });
}

#[test]
fn read_step_below_duration_resolution_is_invalid() {
    assert_rejects_config(ReverseConfig {
        read_step_secs: 1e-12,
        ..ReverseConfig::default()
    });
}

#[test]
fn zero_output_rate_fails_instead_of_hanging() {
    assert_rejects_config(ReverseConfig {
        output_rate: OutputRate::Fixed(FrameRate::new(0, 1)),
        ..ReverseConfig::default()
    });
}

#[test]
#[should_panic(expected = "started twice")]
fn start_after_cancelled_start_panics() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = ReverseSession::new(FakeAsset::new(FakeMedia::new(5, 30)), output(&dir));
    session.cancel();

    let rx = start(&mut session);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Err(ReverseError::Cancelled));
    session.start(|_| {});
}
