use std::path::Path;
use std::time::Duration;

use gst_pbutils::prelude::DiscovererStreamInfoExt;
use gstreamer as gst;
use gstreamer_pbutils as gst_pbutils;

use reverser_core::{AssetMetadata, FrameRate, ReverseError, VideoTrackInfo};

use crate::gst_init::init_once;

const DISCOVER_TIMEOUT_SECS: u64 = 10;

/// Probes `path` for its duration and first video track.
pub fn discover(path: &Path) -> Result<AssetMetadata, ReverseError> {
    init_once().map_err(ReverseError::MetadataLoadFailed)?;

    let uri = url_from_path(path).ok_or_else(|| {
        ReverseError::MetadataLoadFailed(format!("cannot build a URI for {}", path.display()))
    })?;

    let discoverer =
        gst_pbutils::Discoverer::new(gst::ClockTime::from_seconds(DISCOVER_TIMEOUT_SECS))
            .map_err(|e| ReverseError::MetadataLoadFailed(format!("discoverer: {e}")))?;

    let info = discoverer
        .discover_uri(&uri)
        .map_err(|e| ReverseError::MetadataLoadFailed(format!("{uri}: {e}")))?;

    let duration = info
        .duration()
        .map(|d| Duration::from_nanos(d.nseconds()))
        .unwrap_or(Duration::ZERO);

    let video = info.video_streams().into_iter().next().and_then(|stream| {
        let codec = DiscovererStreamInfoExt::caps(&stream)
            .and_then(|caps| caps.structure(0).map(|s| s.name().as_str().to_string()));
        let fps = stream.framerate();
        video_track_info(
            stream.width(),
            stream.height(),
            (fps.numer(), fps.denom()),
            stream.bitrate(),
            codec,
        )
    });

    if let Some(track) = &video {
        log::debug!(
            "discovered {}: {:?}, {}x{}, rate {:?}, codec {:?}",
            path.display(),
            duration,
            track.width,
            track.height,
            track.frame_rate,
            track.codec
        );
    }

    Ok(AssetMetadata { duration, video })
}

/// Discoverer reports unknown values as zero. A track without a size cannot
/// be decoded to frames, so it is treated as absent.
fn video_track_info(
    width: u32,
    height: u32,
    (fps_num, fps_den): (i32, i32),
    bitrate: u32,
    codec: Option<String>,
) -> Option<VideoTrackInfo> {
    if width == 0 || height == 0 {
        return None;
    }
    let frame_rate = match (u32::try_from(fps_num), u32::try_from(fps_den)) {
        (Ok(num), Ok(den)) => Some(FrameRate::new(num, den)).filter(FrameRate::is_valid),
        _ => None,
    };
    Some(VideoTrackInfo {
        width,
        height,
        frame_rate,
        bitrate: (bitrate > 0).then_some(bitrate),
        codec,
    })
}

fn url_from_path(path: &Path) -> Option<String> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    Some(format!("file://{}", abs.display()))
}
