use std::path::Path;
use std::time::Duration;

use reverser_core::pipeline::{CancelToken, Progress, ReversePipeline};
use reverser_core::testing::{FakeAsset, FakeMedia, FakeSink, FakeSource, Recorder, SinkEvent};
use reverser_core::{
    ChunkWindowPlanner, FrameRate, MediaAsset, ReverseError, SinkSettings, TimeWindow,
};

struct Harness {
    pipeline: ReversePipeline<FakeSource, FakeSink>,
    recorder: std::sync::Arc<Recorder>,
    cancel: CancelToken,
    _dir: tempfile::TempDir,
}

fn harness(media: FakeMedia, step: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let asset = FakeAsset::new(media);
    let recorder = asset.recorder();
    let metadata = asset.load_metadata().unwrap();
    let source = asset.open_source(&metadata).unwrap();
    let sink = asset
        .open_sink(&SinkSettings {
            output_path: dir.path().join("out.mp4"),
            width: 1,
            height: 1,
            frame_rate: FrameRate::DEFAULT,
            bitrate: None,
        })
        .unwrap();
    let cancel = CancelToken::new();
    let pipeline = ReversePipeline::new(
        source,
        sink,
        ChunkWindowPlanner::new(metadata.duration, step),
        FrameRate::DEFAULT,
        cancel.clone(),
    );
    Harness {
        pipeline,
        recorder,
        cancel,
        _dir: dir,
    }
}

/// Feeds readiness signals until the pipeline asks for finalization or
/// fails. Returns the number of signals that ended in `Waiting`.
fn drive(pipeline: &mut ReversePipeline<FakeSource, FakeSink>) -> Result<usize, ReverseError> {
    let mut waits = 0;
    for _ in 0..10_000 {
        match pipeline.on_ready()? {
            Progress::Waiting => waits += 1,
            Progress::Finalize => return Ok(waits),
        }
    }
    panic!("pipeline never finished");
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[test]
fn emits_every_frame_in_reverse_with_steady_timestamps() {
    let mut h = harness(FakeMedia::new(99, 30), ms(1000));
    h.pipeline.start().unwrap();
    drive(&mut h.pipeline).unwrap();

    let appended = h.recorder.appended();
    let indices: Vec<u32> = appended.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (0..99).rev().collect::<Vec<_>>());
    for (n, (_, ts)) in appended.iter().enumerate() {
        assert_eq!(ts.value, n as u64);
        assert_eq!(ts.timescale, 30);
    }

    let events = h.recorder.events();
    assert_eq!(events[0], SinkEvent::SessionStarted(appended[0].1));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SinkEvent::SessionStarted(_)))
            .count(),
        1
    );
    assert_eq!(events.last(), Some(&SinkEvent::Finished));
    assert_eq!(h.pipeline.frames_emitted(), 99);
}

#[test]
fn reads_windows_back_to_front() {
    let mut h = harness(FakeMedia::new(99, 30), ms(1000));
    h.pipeline.start().unwrap();
    drive(&mut h.pipeline).unwrap();

    assert_eq!(
        h.recorder.windows(),
        vec![
            TimeWindow::new(ms(2300), ms(1000)),
            TimeWindow::new(ms(1300), ms(1000)),
            TimeWindow::new(ms(300), ms(1000)),
            TimeWindow::new(ms(0), ms(300)),
        ]
    );
    assert_eq!(h.pipeline.windows_read(), 4);
    assert_eq!(h.recorder.appended().last().map(|(i, _)| *i), Some(0));
}

#[test]
fn zero_duration_has_nothing_to_read() {
    let mut media = FakeMedia::new(0, 30);
    media.duration = Some(Duration::ZERO);
    let mut h = harness(media, ms(1000));
    assert_eq!(h.pipeline.start(), Err(ReverseError::NothingToRead));
}

#[test]
fn asset_without_frames_does_not_finalize_empty_output() {
    let mut media = FakeMedia::new(0, 30);
    media.duration = Some(ms(2500));
    let mut h = harness(media, ms(1000));
    h.pipeline.start().unwrap();

    assert_eq!(drive(&mut h.pipeline), Err(ReverseError::NothingToRead));
    assert!(!h.recorder.events().contains(&SinkEvent::Finished));
    assert_eq!(h.recorder.windows().len(), 3);
}

#[test]
fn read_failure_stops_after_earlier_windows() {
    let mut media = FakeMedia::new(60, 30);
    media.fail_read_at_window = Some(2);
    let mut h = harness(media, ms(1000));
    h.pipeline.start().unwrap();

    let err = drive(&mut h.pipeline).unwrap_err();
    assert!(matches!(err, ReverseError::ReadFailed(ref e) if e.0 == "corrupt sample"));

    let indices: Vec<u32> = h.recorder.appended().iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (30..60).rev().collect::<Vec<_>>());
}

#[test]
fn write_failure_surfaces_sink_error() {
    let mut media = FakeMedia::new(60, 30);
    media.sink.fail_after = Some(5);
    let mut h = harness(media, ms(1000));
    h.pipeline.start().unwrap();

    let err = drive(&mut h.pipeline).unwrap_err();
    assert!(matches!(err, ReverseError::WriteFailed(ref e) if e.0 == "encoder error"));
    assert_eq!(h.recorder.appended().len(), 5);
}

#[test]
fn rejected_frames_are_offered_again() {
    let mut media = FakeMedia::new(45, 30);
    media.sink.reject_every = Some(4);
    let mut h = harness(media, ms(1000));
    h.pipeline.start().unwrap();

    let waits = drive(&mut h.pipeline).unwrap();
    assert!(waits > 0);

    let appended = h.recorder.appended();
    let indices: Vec<u32> = appended.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (0..45).rev().collect::<Vec<_>>());
    for (n, (_, ts)) in appended.iter().enumerate() {
        assert_eq!(ts.value, n as u64);
    }

    let rejected: Vec<u32> = h
        .recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SinkEvent::Rejected { index } => Some(index),
            _ => None,
        })
        .collect();
    assert!(!rejected.is_empty());
    for index in rejected {
        assert_eq!(
            appended.iter().filter(|(i, _)| *i == index).count(),
            1,
            "frame {index} appended more than once"
        );
    }
}

#[test]
fn saturated_sink_pauses_until_next_signal() {
    let mut media = FakeMedia::new(40, 30);
    media.sink.burst = Some(4);
    let mut h = harness(media, ms(500));
    h.pipeline.start().unwrap();

    assert_eq!(h.pipeline.on_ready(), Ok(Progress::Waiting));
    assert_eq!(h.recorder.appended().len(), 4);

    let waits = drive(&mut h.pipeline).unwrap();
    assert_eq!(waits, 9);
    assert_eq!(h.recorder.appended().len(), 40);
}

#[test]
fn cancellation_stops_appends() {
    let mut h = harness(FakeMedia::new(30, 30), ms(1000));
    h.pipeline.start().unwrap();
    h.cancel.cancel();

    assert_eq!(h.pipeline.on_ready(), Err(ReverseError::Cancelled));
    assert!(h.recorder.appended().is_empty());
    assert_eq!(
        h.pipeline.outcome(Path::new("out.mp4")),
        Err(ReverseError::Cancelled)
    );
}

#[test]
fn finalized_sink_yields_artifact() {
    let mut h = harness(FakeMedia::new(90, 30), ms(1000));
    h.pipeline.start().unwrap();
    drive(&mut h.pipeline).unwrap();
    h.pipeline.finalize(Box::new(|| {}));

    let artifact = h.pipeline.outcome(Path::new("out.mp4")).unwrap();
    assert_eq!(artifact.frames, 90);
    assert_eq!(artifact.duration, Duration::from_secs(3));

    assert_eq!(h.pipeline.on_ready(), Ok(Progress::Waiting));
    assert_eq!(h.recorder.appended().len(), 90);
}

#[test]
fn finalize_failure_maps_to_write_failed() {
    let mut media = FakeMedia::new(10, 30);
    media.sink.fail_on_finalize = true;
    let mut h = harness(media, ms(1000));
    h.pipeline.start().unwrap();
    drive(&mut h.pipeline).unwrap();
    h.pipeline.finalize(Box::new(|| {}));

    let err = h.pipeline.outcome(Path::new("out.mp4")).unwrap_err();
    assert!(matches!(err, ReverseError::WriteFailed(ref e) if e.0 == "muxer error"));
}
