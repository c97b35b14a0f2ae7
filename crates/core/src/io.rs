use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::FrameRate;
use crate::error::{ReverseError, SinkError, SourceError};
use crate::frame::{OutputTimestamp, RawFrame};
use crate::window::TimeWindow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    Reading,
    /// Every window has been read and `mark_final` was called.
    Completed,
    Cancelled,
    Failed(SourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Writing,
    Completed,
    Cancelled,
    Failed,
}

/// Sequential decoder restricted to one time window at a time.
pub trait FrameSource {
    /// Restricts reading to `window`. Called again for every earlier window.
    fn prepare(&mut self, window: TimeWindow) -> Result<(), SourceError>;

    /// Frames available for the current window, in presentation order. An
    /// empty batch means the window has been fully read.
    fn pull_available_frames(&mut self) -> Vec<RawFrame>;

    /// No further windows will be prepared.
    fn mark_final(&mut self);

    fn status(&self) -> ReadStatus;

    fn cancel(&mut self);
}

/// Callback a sink invokes whenever it can take more frames. It may run on
/// any thread.
pub type ReadyCallback = Box<dyn Fn() + Send + Sync + 'static>;

pub type FinalizeCallback = Box<dyn FnOnce() + Send + 'static>;

/// Demand-driven encoder and muxer.
pub trait FrameSink {
    /// Registers the readiness signal. The sink keeps invoking it while it
    /// has room until it is finished or cancelled.
    fn request_data_when_ready(&mut self, on_ready: ReadyCallback);

    fn is_ready(&self) -> bool;

    /// `false` means the frame was not accepted. The caller keeps the frame
    /// and may offer it again.
    fn append(&mut self, frame: &RawFrame, timestamp: OutputTimestamp) -> bool;

    fn start_output_session(&mut self, at: OutputTimestamp);

    /// End of input; no more `append` calls follow.
    fn mark_finished(&mut self);

    /// Flushes and closes the output, then calls `done` from any thread.
    fn finalize(&mut self, done: FinalizeCallback);

    fn cancel(&mut self);

    fn status(&self) -> WriteStatus;

    fn error(&self) -> Option<SinkError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrackInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<FrameRate>,
    /// Estimated bits per second, when the container reports one.
    pub bitrate: Option<u32>,
    pub codec: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetMetadata {
    pub duration: Duration,
    pub video: Option<VideoTrackInfo>,
}

/// Writer configuration derived from the source track.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSettings {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub bitrate: Option<u32>,
}

/// Handle to the media being reversed. Opens the collaborators a session
/// drives.
pub trait MediaAsset: Send + Sync + 'static {
    type Source: FrameSource;
    type Sink: FrameSink;

    /// Blocking metadata load. Runs off the session's worker thread.
    fn load_metadata(&self) -> Result<AssetMetadata, ReverseError>;

    /// Best-effort interruption of an in-flight `load_metadata`.
    fn cancel_loading(&self) {}

    fn open_source(&self, metadata: &AssetMetadata) -> Result<Self::Source, ReverseError>;

    fn open_sink(&self, settings: &SinkSettings) -> Result<Self::Sink, ReverseError>;
}

/// The finished, reversed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub frames: u64,
    pub duration: Duration,
}

/// Removes a file left at `path` so the sink can create it fresh.
pub fn clear_output_path(path: &Path) -> Result<(), ReverseError> {
    let unwritable = |reason: String| ReverseError::OutputPathUnwritable {
        path: path.to_path_buf(),
        reason,
    };

    if path.is_dir() {
        return Err(unwritable("path is a directory".into()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            return Err(unwritable(format!(
                "parent directory {} does not exist",
                parent.display()
            )));
        }
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            log::debug!("removed existing output {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(unwritable(e.to_string())),
    }
}
