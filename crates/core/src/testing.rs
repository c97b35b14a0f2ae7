//! In-memory collaborators for driving sessions without a media backend.
//!
//! Every fake frame is a single RGBA pixel whose four bytes hold the frame's
//! index in the source, so output order can be checked with [`frame_index`].

use std::cell::Cell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::FrameRate;
use crate::error::{ReverseError, SinkError, SourceError};
use crate::frame::{OutputTimestamp, RawFrame};
use crate::io::{
    AssetMetadata, FinalizeCallback, FrameSink, FrameSource, MediaAsset, ReadStatus,
    ReadyCallback, SinkSettings, VideoTrackInfo, WriteStatus,
};
use crate::window::TimeWindow;

pub fn frame_index(frame: &RawFrame) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&frame.rgba_data[..4]);
    u32::from_le_bytes(bytes)
}

pub fn source_frame(index: u32, fps: u32) -> RawFrame {
    RawFrame {
        pts: Duration::from_nanos(index as u64 * 1_000_000_000 / fps as u64),
        width: 1,
        height: 1,
        rgba_data: index.to_le_bytes().to_vec().into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    SessionStarted(OutputTimestamp),
    Appended { index: u32, timestamp: OutputTimestamp },
    Rejected { index: u32 },
    Finished,
    Finalized,
    Cancelled,
}

/// What the fakes observed, shared with the test after the asset has been
/// moved into a session.
#[derive(Debug, Default)]
pub struct Recorder {
    windows: Mutex<Vec<TimeWindow>>,
    events: Mutex<Vec<SinkEvent>>,
    settings: Mutex<Option<SinkSettings>>,
    metadata_loads: AtomicUsize,
    sources_opened: AtomicUsize,
    sinks_opened: AtomicUsize,
}

impl Recorder {
    pub fn windows(&self) -> Vec<TimeWindow> {
        self.windows.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn sink_settings(&self) -> Option<SinkSettings> {
        self.settings.lock().unwrap().clone()
    }

    pub fn appended(&self) -> Vec<(u32, OutputTimestamp)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Appended { index, timestamp } => Some((index, timestamp)),
                _ => None,
            })
            .collect()
    }

    pub fn metadata_loads(&self) -> usize {
        self.metadata_loads.load(Ordering::SeqCst)
    }

    pub fn sources_opened(&self) -> usize {
        self.sources_opened.load(Ordering::SeqCst)
    }

    pub fn sinks_opened(&self) -> usize {
        self.sinks_opened.load(Ordering::SeqCst)
    }

    /// Polls until at least `count` frames were appended.
    pub fn wait_for_appends(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.appended().len() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeSinkBehavior {
    /// Frames accepted per readiness signal.
    pub burst: Option<usize>,
    /// Every nth append attempt is rejected, then retried.
    pub reject_every: Option<usize>,
    /// The sink fails once this many frames were accepted.
    pub fail_after: Option<usize>,
    /// The sink stops asking for data once this many frames were accepted.
    pub stall_after: Option<usize>,
    pub fail_on_finalize: bool,
}

#[derive(Debug, Clone)]
pub struct FakeMedia {
    pub frame_count: u32,
    pub fps: u32,
    /// Defaults to `frame_count / fps`.
    pub duration: Option<Duration>,
    pub has_video: bool,
    pub reported_rate: Option<FrameRate>,
    pub metadata_error: Option<ReverseError>,
    /// `load_metadata` blocks until `cancel_loading` is called.
    pub hold_metadata: bool,
    pub source_attach_error: Option<String>,
    pub sink_attach_error: Option<String>,
    /// The nth prepared window (1-based) fails to decode.
    pub fail_read_at_window: Option<usize>,
    pub pull_batch: usize,
    pub sink: FakeSinkBehavior,
}

impl FakeMedia {
    pub fn new(frame_count: u32, fps: u32) -> Self {
        Self {
            frame_count,
            fps,
            duration: None,
            has_video: true,
            reported_rate: Some(FrameRate::new(fps, 1)),
            metadata_error: None,
            hold_metadata: false,
            source_attach_error: None,
            sink_attach_error: None,
            fail_read_at_window: None,
            pull_batch: 7,
            sink: FakeSinkBehavior::default(),
        }
    }

    fn duration(&self) -> Duration {
        self.duration.unwrap_or_else(|| {
            Duration::from_nanos(self.frame_count as u64 * 1_000_000_000 / self.fps as u64)
        })
    }
}

pub struct FakeAsset {
    media: FakeMedia,
    recorder: Arc<Recorder>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl FakeAsset {
    pub fn new(media: FakeMedia) -> Self {
        Self {
            media,
            recorder: Arc::new(Recorder::default()),
            gate: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        self.recorder.clone()
    }
}

impl MediaAsset for FakeAsset {
    type Source = FakeSource;
    type Sink = FakeSink;

    fn load_metadata(&self) -> Result<AssetMetadata, ReverseError> {
        self.recorder.metadata_loads.fetch_add(1, Ordering::SeqCst);
        if self.media.hold_metadata {
            let (lock, cvar) = &*self.gate;
            let mut released = lock.lock().unwrap();
            while !*released {
                released = cvar.wait(released).unwrap();
            }
            return Err(ReverseError::MetadataLoadFailed("loading cancelled".into()));
        }
        if let Some(e) = &self.media.metadata_error {
            return Err(e.clone());
        }
        Ok(AssetMetadata {
            duration: self.media.duration(),
            video: self.media.has_video.then(|| VideoTrackInfo {
                width: 1,
                height: 1,
                frame_rate: self.media.reported_rate,
                bitrate: Some(1_000_000),
                codec: Some("video/x-fake".into()),
            }),
        })
    }

    fn cancel_loading(&self) {
        let (lock, cvar) = &*self.gate;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn open_source(&self, _metadata: &AssetMetadata) -> Result<FakeSource, ReverseError> {
        if let Some(e) = &self.media.source_attach_error {
            return Err(ReverseError::SourceAttachFailed(e.clone()));
        }
        self.recorder.sources_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSource {
            frames: (0..self.media.frame_count)
                .map(|i| source_frame(i, self.media.fps))
                .collect(),
            pending: VecDeque::new(),
            batch: self.media.pull_batch.max(1),
            status: ReadStatus::Reading,
            prepared: 0,
            fail_at: self.media.fail_read_at_window,
            recorder: self.recorder.clone(),
        })
    }

    fn open_sink(&self, settings: &SinkSettings) -> Result<FakeSink, ReverseError> {
        if let Some(e) = &self.media.sink_attach_error {
            return Err(ReverseError::SinkAttachFailed(e.clone()));
        }
        std::fs::write(&settings.output_path, b"").map_err(|e| {
            ReverseError::OutputPathUnwritable {
                path: settings.output_path.clone(),
                reason: e.to_string(),
            }
        })?;
        self.recorder.sinks_opened.fetch_add(1, Ordering::SeqCst);
        *self.recorder.settings.lock().unwrap() = Some(settings.clone());
        Ok(FakeSink {
            behavior: self.media.sink.clone(),
            recorder: self.recorder.clone(),
            output_path: settings.output_path.clone(),
            on_ready: None,
            status: WriteStatus::Writing,
            error: None,
            in_burst: Cell::new(0),
            attempts: 0,
            accepted: 0,
        })
    }
}

pub struct FakeSource {
    frames: Vec<RawFrame>,
    pending: VecDeque<RawFrame>,
    batch: usize,
    status: ReadStatus,
    prepared: usize,
    fail_at: Option<usize>,
    recorder: Arc<Recorder>,
}

impl FrameSource for FakeSource {
    fn prepare(&mut self, window: TimeWindow) -> Result<(), SourceError> {
        self.prepared += 1;
        self.recorder.windows.lock().unwrap().push(window);
        if self.fail_at == Some(self.prepared) {
            self.status = ReadStatus::Failed(SourceError::new("corrupt sample"));
            return Ok(());
        }
        self.pending = self
            .frames
            .iter()
            .filter(|f| window.contains(f.pts))
            .cloned()
            .collect();
        Ok(())
    }

    fn pull_available_frames(&mut self) -> Vec<RawFrame> {
        if self.status != ReadStatus::Reading {
            return Vec::new();
        }
        let n = self.batch.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    fn mark_final(&mut self) {
        if self.status == ReadStatus::Reading {
            self.status = ReadStatus::Completed;
        }
    }

    fn status(&self) -> ReadStatus {
        self.status.clone()
    }

    fn cancel(&mut self) {
        self.status = ReadStatus::Cancelled;
    }
}

pub struct FakeSink {
    behavior: FakeSinkBehavior,
    recorder: Arc<Recorder>,
    output_path: PathBuf,
    on_ready: Option<ReadyCallback>,
    status: WriteStatus,
    error: Option<SinkError>,
    in_burst: Cell<usize>,
    attempts: usize,
    accepted: usize,
}

impl FakeSink {
    fn signal(&self) {
        if let Some(on_ready) = &self.on_ready {
            on_ready();
        }
    }
}

impl FrameSink for FakeSink {
    fn request_data_when_ready(&mut self, on_ready: ReadyCallback) {
        self.on_ready = Some(on_ready);
        self.signal();
    }

    fn is_ready(&self) -> bool {
        if self.status != WriteStatus::Writing {
            return false;
        }
        if self.behavior.stall_after.is_some_and(|n| self.accepted >= n) {
            return false;
        }
        if let Some(burst) = self.behavior.burst {
            if self.in_burst.get() >= burst {
                self.in_burst.set(0);
                self.signal();
                return false;
            }
        }
        true
    }

    fn append(&mut self, frame: &RawFrame, timestamp: OutputTimestamp) -> bool {
        if self.status != WriteStatus::Writing {
            return false;
        }
        let index = frame_index(frame);
        self.attempts += 1;
        if self
            .behavior
            .reject_every
            .is_some_and(|n| self.attempts % n == 0)
        {
            self.recorder.record(SinkEvent::Rejected { index });
            self.signal();
            return false;
        }

        self.recorder
            .record(SinkEvent::Appended { index, timestamp });
        self.accepted += 1;
        self.in_burst.set(self.in_burst.get() + 1);
        if self.behavior.fail_after == Some(self.accepted) {
            self.status = WriteStatus::Failed;
            self.error = Some(SinkError::new("encoder error"));
        }
        true
    }

    fn start_output_session(&mut self, at: OutputTimestamp) {
        self.recorder.record(SinkEvent::SessionStarted(at));
    }

    fn mark_finished(&mut self) {
        self.recorder.record(SinkEvent::Finished);
    }

    fn finalize(&mut self, done: FinalizeCallback) {
        if self.behavior.fail_on_finalize {
            self.status = WriteStatus::Failed;
            self.error = Some(SinkError::new("muxer error"));
        } else {
            let _ = std::fs::write(&self.output_path, format!("{} frames", self.accepted));
            self.status = WriteStatus::Completed;
        }
        self.recorder.record(SinkEvent::Finalized);
        std::thread::spawn(done);
    }

    fn cancel(&mut self) {
        if self.status == WriteStatus::Writing {
            self.status = WriteStatus::Cancelled;
        }
        self.recorder.record(SinkEvent::Cancelled);
    }

    fn status(&self) -> WriteStatus {
        self.status
    }

    fn error(&self) -> Option<SinkError> {
        self.error.clone()
    }
}
