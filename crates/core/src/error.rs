use std::path::PathBuf;

/// Failure reported by a [`FrameSource`](crate::io::FrameSource) backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SourceError(pub String);

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure reported by a [`FrameSink`](crate::io::FrameSink) backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Terminal outcome of a reversal session other than success.
///
/// None of these are retried internally. A caller that wants another attempt
/// creates a new session.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReverseError {
    #[error("failed to load asset metadata: {0}")]
    MetadataLoadFailed(String),

    #[error("asset has no readable video track")]
    NoReadableTrack,

    #[error("failed to attach frame source: {0}")]
    SourceAttachFailed(String),

    #[error("failed to attach frame sink: {0}")]
    SinkAttachFailed(String),

    #[error("output path {path} is not writable: {reason}")]
    OutputPathUnwritable { path: PathBuf, reason: String },

    #[error("read failed")]
    ReadFailed(#[source] SourceError),

    #[error("write failed")]
    WriteFailed(#[source] SinkError),

    #[error("nothing to read")]
    NothingToRead,

    /// Delivered to the completion callback of a cancelled session. Never
    /// stored as the session's error.
    #[error("cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A source/sink status combination that should not be reachable.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid frame rate {0:?}")]
    FrameRate(String),

    #[error("read step must be a positive number of seconds, got {0}")]
    ReadStep(f64),

    #[error("pull batch must be at least 1")]
    PullBatch,
}
