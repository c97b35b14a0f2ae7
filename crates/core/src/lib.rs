pub mod chunk;
pub mod config;
pub mod error;
pub mod frame;
pub mod io;
pub mod pipeline;
pub mod session;
#[cfg(feature = "testing")]
pub mod testing;
pub mod window;

pub use config::{FrameRate, OutputRate, PartialOutputPolicy, ReverseConfig};
pub use error::{ConfigError, ReverseError, SinkError, SourceError};
pub use frame::{OutputClock, OutputTimestamp, RawFrame};
pub use io::{
    AssetMetadata, FrameSink, FrameSource, MediaAsset, OutputArtifact, ReadStatus, SinkSettings,
    VideoTrackInfo, WriteStatus,
};
pub use session::{ReverseSession, SessionId, SessionResult, SessionStatus};
pub use window::{ChunkWindowPlanner, TimeWindow};
