use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use reverser_core::{FrameSource, RawFrame, ReadStatus, SourceError, TimeWindow};

use crate::gst_init::*;

const PULL_TIMEOUT_SECS: u64 = 5;

/// Decodes one time window at a time through an accurate segment seek.
///
/// `filesrc ! decodebin ! videoconvert ! videoscale ! appsink`, scaled to the
/// track's own size so every frame matches the encoder caps.
pub struct GstFrameSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    bus: gst::Bus,
    target_w: u32,
    target_h: u32,
    batch: usize,
    window: Option<TimeWindow>,
    window_drained: bool,
    is_playing: bool,
    status: ReadStatus,
}

impl GstFrameSource {
    pub fn open(path: &Path, target_w: u32, target_h: u32, batch: usize) -> Result<Self, String> {
        init_once()?;

        let location = path
            .to_str()
            .ok_or_else(|| format!("Non UTF-8 path: {}", path.display()))?;

        let pipeline = gst::Pipeline::new();

        let filesrc = gst::ElementFactory::make("filesrc")
            .property("location", location)
            .build()
            .map_err(|e| format!("Failed to create filesrc: {e}"))?;

        let decodebin = make_element("decodebin")?;
        let videoconvert = make_element("videoconvert")?;
        let videoscale = make_element("videoscale")?;

        let appsink = gst_app::AppSink::builder()
            .caps(&build_video_caps(target_w, target_h))
            .sync(false)
            .build();

        pipeline
            .add_many([
                &filesrc,
                &decodebin,
                &videoconvert,
                &videoscale,
                appsink.upcast_ref::<gst::Element>(),
            ])
            .map_err(|e| format!("Failed to add elements: {e}"))?;

        gst::Element::link_many([&filesrc, &decodebin])
            .map_err(|e| format!("Failed to link filesrc->decodebin: {e}"))?;
        gst::Element::link_many([
            &videoconvert,
            &videoscale,
            appsink.upcast_ref::<gst::Element>(),
        ])
        .map_err(|e| format!("Failed to link video chain: {e}"))?;

        connect_decodebin_video_only(&decodebin, &videoconvert);

        if let Err(e) = pipeline.set_state(gst::State::Paused) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(format!("Failed to set Paused: {e}"));
        }

        let Some(bus) = pipeline.bus() else {
            let _ = pipeline.set_state(gst::State::Null);
            return Err("No bus".to_string());
        };
        if let Err(e) = wait_for_async_done(&bus, gst::ClockTime::from_seconds(10)) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(format!("Preroll error: {e}"));
        }

        Ok(Self {
            pipeline,
            appsink,
            bus,
            target_w,
            target_h,
            batch: batch.max(1),
            window: None,
            window_drained: true,
            is_playing: false,
            status: ReadStatus::Reading,
        })
    }

    fn ensure_playing(&mut self) -> Result<(), SourceError> {
        if !self.is_playing {
            self.pipeline
                .set_state(gst::State::Playing)
                .map_err(|e| SourceError::new(format!("Failed to set Playing: {e}")))?;
            self.is_playing = true;
        }
        Ok(())
    }

    fn fail(&mut self, reason: String) {
        log::warn!("frame source failed: {reason}");
        self.status = ReadStatus::Failed(SourceError::new(reason));
        self.window_drained = true;
    }

    fn frame_from_sample(&self, sample: &gst::Sample) -> Option<RawFrame> {
        let buffer = sample.buffer()?;
        let pts = Duration::from_nanos(buffer.pts()?.nseconds());

        let expected_size = (self.target_w as usize) * (self.target_h as usize) * 4;
        let map = buffer.map_readable().ok()?;
        let data = map.as_slice();

        let mut rgba = Vec::with_capacity(expected_size);
        if data.len() >= expected_size {
            rgba.extend_from_slice(&data[..expected_size]);
        } else {
            rgba.extend_from_slice(data);
            rgba.resize(expected_size, 0);
        }

        Some(RawFrame {
            pts,
            width: self.target_w,
            height: self.target_h,
            rgba_data: Arc::from(rgba),
        })
    }
}

impl FrameSource for GstFrameSource {
    fn prepare(&mut self, window: TimeWindow) -> Result<(), SourceError> {
        if self.status != ReadStatus::Reading {
            return Err(SourceError::new("source is no longer reading"));
        }
        self.ensure_playing()?;

        self.pipeline
            .seek(
                1.0,
                gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                gst::SeekType::Set,
                clock_time(window.start),
                gst::SeekType::Set,
                clock_time(window.end()),
            )
            .map_err(|e| SourceError::new(format!("Seek to {window} failed: {e}")))?;

        log::trace!("source seeked to {window}");
        self.window = Some(window);
        self.window_drained = false;
        Ok(())
    }

    fn pull_available_frames(&mut self) -> Vec<RawFrame> {
        let Some(window) = self.window else {
            return Vec::new();
        };
        if self.window_drained || self.status != ReadStatus::Reading {
            return Vec::new();
        }

        let mut frames = Vec::with_capacity(self.batch);
        while frames.len() < self.batch {
            match self
                .appsink
                .try_pull_sample(gst::ClockTime::from_seconds(PULL_TIMEOUT_SECS))
            {
                Some(sample) => {
                    // Segment clipping is not exact for every demuxer.
                    if let Some(frame) = self.frame_from_sample(&sample) {
                        if window.contains(frame.pts) {
                            frames.push(frame);
                        }
                    }
                }
                None => {
                    if let Some(err) = pop_bus_error(&self.bus) {
                        self.fail(err);
                    } else if self.appsink.is_eos() {
                        self.window_drained = true;
                    } else {
                        self.fail(format!("no frame decoded within {PULL_TIMEOUT_SECS}s"));
                    }
                    break;
                }
            }
        }
        frames
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
        if self.status == ReadStatus::Reading {
            self.status = ReadStatus::Cancelled;
        }
        self.window_drained = true;
        let _ = self.pipeline.set_state(gst::State::Null);
        self.is_playing = false;
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
        let _ = self.pipeline.state(gst::ClockTime::from_seconds(2));
    }
}
