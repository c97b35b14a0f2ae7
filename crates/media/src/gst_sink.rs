use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use reverser_core::io::{FinalizeCallback, ReadyCallback};
use reverser_core::{FrameSink, OutputTimestamp, RawFrame, SinkError, SinkSettings, WriteStatus};

use crate::gst_init::*;

/// Frames the appsrc queue holds before it reports itself full.
const QUEUED_FRAMES: u64 = 8;
const FINALIZE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BITRATE_KBPS: u32 = 4_000;

struct SinkShared {
    status: WriteStatus,
    error: Option<SinkError>,
    on_ready: Option<Arc<ReadyCallback>>,
}

/// `appsrc ! videoconvert ! x264enc ! h264parse ! mp4mux ! filesink`.
///
/// Readiness follows the appsrc queue: `need-data` drives the registered
/// callback and `is_ready` is true while the queue is below its byte limit.
pub struct GstFrameSink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    bus: gst::Bus,
    frame_duration: gst::ClockTime,
    session_start: Option<u64>,
    finishing: bool,
    shared: Arc<Mutex<SinkShared>>,
}

fn lock(shared: &Mutex<SinkShared>) -> MutexGuard<'_, SinkShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn notify_ready(shared: &Mutex<SinkShared>) {
    let callback = {
        let guard = lock(shared);
        if guard.status != WriteStatus::Writing {
            return;
        }
        guard.on_ready.clone()
    };
    if let Some(callback) = callback {
        callback();
    }
}

/// Records an error posted from a streaming thread and wakes the writer so
/// it observes the failure instead of waiting for `need-data`.
fn fail_from_bus(shared: &Mutex<SinkShared>, reason: String) {
    let callback = {
        let mut guard = lock(shared);
        if guard.status != WriteStatus::Writing {
            return;
        }
        log::warn!("encoder error: {reason}");
        guard.status = WriteStatus::Failed;
        guard.error = Some(SinkError::new(reason));
        guard.on_ready.clone()
    };
    if let Some(callback) = callback {
        callback();
    }
}

/// x264enc takes kbit/s; the source track reports bit/s.
fn encoder_bitrate_kbps(source_bps: Option<u32>) -> u32 {
    source_bps
        .map(|bps| (bps / 1000).max(1))
        .unwrap_or(DEFAULT_BITRATE_KBPS)
}

/// Waits for the muxer to write its trailer. Returns early once the sink is
/// cancelled from another thread.
fn wait_for_eos(bus: &gst::Bus, shared: &Mutex<SinkShared>) -> Result<(), String> {
    let poll = gst::ClockTime::from_mseconds(250);
    let mut waited = gst::ClockTime::ZERO;
    while waited < gst::ClockTime::from_seconds(FINALIZE_TIMEOUT_SECS) {
        if lock(shared).status != WriteStatus::Writing {
            return Err("finalize interrupted".to_string());
        }
        if let Some(msg) =
            bus.timed_pop_filtered(poll, &[gst::MessageType::Eos, gst::MessageType::Error])
        {
            return match msg.view() {
                gst::MessageView::Eos(_) => Ok(()),
                gst::MessageView::Error(err) => Err(format!("{}", err.error())),
                _ => Err("unexpected bus message".to_string()),
            };
        }
        waited += poll;
    }
    Err(format!("muxer did not finish within {FINALIZE_TIMEOUT_SECS}s"))
}

impl GstFrameSink {
    pub fn open(settings: &SinkSettings) -> Result<Self, String> {
        init_once()?;

        let location = settings
            .output_path
            .to_str()
            .ok_or_else(|| format!("Non UTF-8 path: {}", settings.output_path.display()))?;

        let frame_bytes = settings.width as u64 * settings.height as u64 * 4;
        let caps = build_video_caps_with_rate(settings.width, settings.height, settings.frame_rate)?;

        let appsrc = gst_app::AppSrc::builder()
            .caps(&caps)
            .format(gst::Format::Time)
            .max_bytes(frame_bytes * QUEUED_FRAMES)
            .block(false)
            .build();

        let bitrate_kbps = encoder_bitrate_kbps(settings.bitrate);

        let videoconvert = make_element("videoconvert")?;
        let encoder = gst::ElementFactory::make("x264enc")
            .property("bitrate", bitrate_kbps)
            .build()
            .map_err(|e| format!("Failed to create x264enc: {e}"))?;
        let parser = make_element("h264parse")?;
        let muxer = make_element("mp4mux")?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", location)
            .build()
            .map_err(|e| format!("Failed to create filesink: {e}"))?;

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([
                appsrc.upcast_ref::<gst::Element>(),
                &videoconvert,
                &encoder,
                &parser,
                &muxer,
                &filesink,
            ])
            .map_err(|e| format!("Failed to add elements: {e}"))?;
        gst::Element::link_many([
            appsrc.upcast_ref::<gst::Element>(),
            &videoconvert,
            &encoder,
            &parser,
            &muxer,
            &filesink,
        ])
        .map_err(|e| format!("Failed to link encoder chain: {e}"))?;

        let Some(bus) = pipeline.bus() else {
            return Err("No bus".to_string());
        };

        let shared = Arc::new(Mutex::new(SinkShared {
            status: WriteStatus::Writing,
            error: None,
            on_ready: None,
        }));

        let weak = Arc::downgrade(&shared);
        bus.set_sync_handler(move |_bus, msg| {
            if let gst::MessageView::Error(err) = msg.view() {
                if let Some(shared) = weak.upgrade() {
                    fail_from_bus(&shared, format!("{}", err.error()));
                }
            }
            gst::BusSyncReply::Pass
        });

        let weak = Arc::downgrade(&shared);
        appsrc.set_callbacks(
            gst_app::AppSrcCallbacks::builder()
                .need_data(move |_appsrc, _length| {
                    if let Some(shared) = weak.upgrade() {
                        notify_ready(&shared);
                    }
                })
                .build(),
        );

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let detail = pop_bus_error(&bus).unwrap_or_else(|| e.to_string());
            let _ = pipeline.set_state(gst::State::Null);
            return Err(format!("Failed to start encoder: {detail}"));
        }

        log::debug!(
            "encoder opened: {} {}x{} @ {} ({} kbps)",
            settings.output_path.display(),
            settings.width,
            settings.height,
            settings.frame_rate,
            bitrate_kbps
        );

        Ok(Self {
            pipeline,
            appsrc,
            bus,
            frame_duration: clock_time(settings.frame_rate.frame_duration()),
            session_start: None,
            finishing: false,
            shared,
        })
    }

    fn fail(&self, reason: String) {
        log::warn!("frame sink failed: {reason}");
        let mut guard = lock(&self.shared);
        if guard.status == WriteStatus::Writing {
            guard.status = WriteStatus::Failed;
            guard.error = Some(SinkError::new(reason));
        }
    }

    /// Errors posted by the encoder chain only surface on the bus.
    fn poll_errors(&self) {
        if self.finishing {
            return;
        }
        if let Some(err) = pop_bus_error(&self.bus) {
            self.fail(err);
        }
    }
}

impl FrameSink for GstFrameSink {
    fn request_data_when_ready(&mut self, on_ready: ReadyCallback) {
        lock(&self.shared).on_ready = Some(Arc::new(on_ready));
        // need-data may already have fired before anyone was listening.
        if self.is_ready() {
            notify_ready(&self.shared);
        }
    }

    fn is_ready(&self) -> bool {
        self.poll_errors();
        lock(&self.shared).status == WriteStatus::Writing
            && self.appsrc.current_level_bytes() < self.appsrc.max_bytes()
    }

    fn append(&mut self, frame: &RawFrame, timestamp: OutputTimestamp) -> bool {
        self.poll_errors();
        if lock(&self.shared).status != WriteStatus::Writing {
            return false;
        }

        let start = self.session_start.unwrap_or(0);
        let pts = gst::ClockTime::from_nseconds(timestamp.as_nanos().saturating_sub(start));

        let mut buffer = gst::Buffer::from_slice(Arc::clone(&frame.rgba_data));
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(pts);
            buffer.set_duration(self.frame_duration);
        }

        match self.appsrc.push_buffer(buffer) {
            Ok(_) => true,
            Err(gst::FlowError::Flushing) => false,
            Err(e) => {
                let detail = pop_bus_error(&self.bus).unwrap_or_else(|| format!("{e:?}"));
                self.fail(format!("push failed: {detail}"));
                false
            }
        }
    }

    fn start_output_session(&mut self, at: OutputTimestamp) {
        self.session_start = Some(at.as_nanos());
    }

    fn mark_finished(&mut self) {
        if let Err(e) = self.appsrc.end_of_stream() {
            self.fail(format!("end of stream rejected: {e:?}"));
        }
    }

    fn finalize(&mut self, done: FinalizeCallback) {
        if lock(&self.shared).status != WriteStatus::Writing {
            done();
            return;
        }
        self.finishing = true;

        let pipeline = self.pipeline.clone();
        let bus = self.bus.clone();
        let shared = Arc::clone(&self.shared);
        std::thread::spawn(move || {
            let outcome = wait_for_eos(&bus, &shared);
            let _ = pipeline.set_state(gst::State::Null);

            {
                let mut guard = lock(&shared);
                guard.on_ready = None;
                if guard.status == WriteStatus::Writing {
                    match outcome {
                        Ok(()) => guard.status = WriteStatus::Completed,
                        Err(reason) => {
                            log::warn!("finalize failed: {reason}");
                            guard.status = WriteStatus::Failed;
                            guard.error = Some(SinkError::new(reason));
                        }
                    }
                }
            }
            done();
        });
    }

    fn cancel(&mut self) {
        {
            let mut guard = lock(&self.shared);
            guard.on_ready = None;
            if guard.status == WriteStatus::Writing {
                guard.status = WriteStatus::Cancelled;
            }
        }
        let _ = self.pipeline.set_state(gst::State::Null);
    }

    fn status(&self) -> WriteStatus {
        self.poll_errors();
        lock(&self.shared).status
    }

    fn error(&self) -> Option<SinkError> {
        lock(&self.shared).error.clone()
    }
}

impl Drop for GstFrameSink {
    fn drop(&mut self) {
        lock(&self.shared).on_ready = None;
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_follows_source_track() {
        assert_eq!(encoder_bitrate_kbps(Some(8_000_000)), 8_000);
        assert_eq!(encoder_bitrate_kbps(Some(300)), 1);
        assert_eq!(encoder_bitrate_kbps(None), DEFAULT_BITRATE_KBPS);
    }

    #[test]
    fn bus_error_fails_once_and_wakes_writer() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        let on_ready: ReadyCallback = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let shared = Mutex::new(SinkShared {
            status: WriteStatus::Writing,
            error: None,
            on_ready: Some(Arc::new(on_ready)),
        });

        fail_from_bus(&shared, "not-negotiated".into());
        fail_from_bus(&shared, "later error".into());
        notify_ready(&shared);

        let guard = lock(&shared);
        assert_eq!(guard.status, WriteStatus::Failed);
        assert_eq!(guard.error, Some(SinkError::new("not-negotiated")));
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
    }
}
