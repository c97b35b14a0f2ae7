pub mod asset;
pub mod gst_init;
pub mod gst_sink;
pub mod gst_source;
pub mod metadata;

pub use asset::GstAsset;
pub use gst_sink::GstFrameSink;
pub use gst_source::GstFrameSource;
