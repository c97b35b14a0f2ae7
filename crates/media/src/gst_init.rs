use std::sync::OnceLock;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;

use reverser_core::FrameRate;

pub fn init_once() -> Result<(), String> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| gst::init().map_err(|e| format!("Failed to initialize GStreamer: {e}")))
        .clone()
}

pub(crate) fn clock_time(d: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(d.as_nanos() as u64)
}

pub(crate) fn wait_for_async_done(bus: &gst::Bus, timeout: gst::ClockTime) -> Result<(), String> {
    loop {
        let Some(msg) = bus.timed_pop(timeout) else {
            return Ok(());
        };
        match msg.view() {
            gst::MessageView::AsyncDone(_) => return Ok(()),
            gst::MessageView::Error(err) => {
                return Err(format!("{}", err.error()));
            }
            _ => {}
        }
    }
}

/// Drains pending error messages without blocking, returning the first one.
pub(crate) fn pop_bus_error(bus: &gst::Bus) -> Option<String> {
    let mut first = None;
    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
        if let gst::MessageView::Error(err) = msg.view() {
            let text = match err.debug() {
                Some(debug) => format!("{} ({debug})", err.error()),
                None => format!("{}", err.error()),
            };
            first.get_or_insert(text);
        }
    }
    first
}

pub(crate) fn build_video_caps(target_w: u32, target_h: u32) -> gst::Caps {
    gst_video::VideoCapsBuilder::new()
        .format(gst_video::VideoFormat::Rgba)
        .width(target_w as i32)
        .height(target_h as i32)
        .build()
}

pub(crate) fn caps_fraction(rate: FrameRate) -> Result<gst::Fraction, String> {
    match (i32::try_from(rate.num), i32::try_from(rate.den)) {
        (Ok(num), Ok(den)) if num > 0 && den > 0 => Ok(gst::Fraction::new(num, den)),
        _ => Err(format!("Frame rate {rate} does not fit in caps")),
    }
}

pub(crate) fn build_video_caps_with_rate(
    target_w: u32,
    target_h: u32,
    rate: FrameRate,
) -> Result<gst::Caps, String> {
    let framerate = caps_fraction(rate)?;
    Ok(gst_video::VideoCapsBuilder::new()
        .format(gst_video::VideoFormat::Rgba)
        .width(target_w as i32)
        .height(target_h as i32)
        .framerate(framerate)
        .build())
}

pub(crate) fn make_element(factory_name: &str) -> Result<gst::Element, String> {
    gst::ElementFactory::make(factory_name)
        .build()
        .map_err(|e| format!("Failed to create {factory_name}: {e}"))
}

pub(crate) fn connect_decodebin_video_only(decodebin: &gst::Element, videoconvert: &gst::Element) {
    let videoconvert_weak = videoconvert.downgrade();
    decodebin.connect_pad_added(move |_dbin, src_pad| {
        let caps = match src_pad.current_caps() {
            Some(c) => c,
            None => src_pad.query_caps(None),
        };
        let Some(structure) = caps.structure(0) else {
            return;
        };
        if structure.name().as_str().starts_with("video/") {
            let Some(vc) = videoconvert_weak.upgrade() else {
                return;
            };
            let Some(sink_pad) = vc.static_pad("sink") else {
                log::warn!("videoconvert has no sink pad");
                return;
            };
            if !sink_pad.is_linked() {
                if let Err(e) = src_pad.link(&sink_pad) {
                    log::warn!("Failed to link decoded video pad: {e:?}");
                }
            }
        }
    });
}
