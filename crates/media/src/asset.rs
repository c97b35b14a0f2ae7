use std::path::{Path, PathBuf};

use reverser_core::config::DEFAULT_PULL_BATCH;
use reverser_core::{AssetMetadata, MediaAsset, ReverseError, SinkSettings};

use crate::gst_sink::GstFrameSink;
use crate::gst_source::GstFrameSource;
use crate::metadata;

/// A media file on disk, decoded and encoded through GStreamer.
#[derive(Debug, Clone)]
pub struct GstAsset {
    path: PathBuf,
    pull_batch: usize,
}

impl GstAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pull_batch: DEFAULT_PULL_BATCH,
        }
    }

    /// Upper bound on frames decoded per pull.
    pub fn with_pull_batch(mut self, pull_batch: usize) -> Self {
        self.pull_batch = pull_batch.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MediaAsset for GstAsset {
    type Source = GstFrameSource;
    type Sink = GstFrameSink;

    // Discoverer runs synchronously, so loading cannot be interrupted. The
    // session discards a result that arrives after cancellation.
    fn load_metadata(&self) -> Result<AssetMetadata, ReverseError> {
        if !self.path.is_file() {
            return Err(ReverseError::MetadataLoadFailed(format!(
                "{} is not a file",
                self.path.display()
            )));
        }
        metadata::discover(&self.path)
    }

    fn open_source(&self, metadata: &AssetMetadata) -> Result<GstFrameSource, ReverseError> {
        let track = metadata.video.as_ref().ok_or(ReverseError::NoReadableTrack)?;
        GstFrameSource::open(&self.path, track.width, track.height, self.pull_batch)
            .map_err(ReverseError::SourceAttachFailed)
    }

    fn open_sink(&self, settings: &SinkSettings) -> Result<GstFrameSink, ReverseError> {
        GstFrameSink::open(settings).map_err(ReverseError::SinkAttachFailed)
    }
}
