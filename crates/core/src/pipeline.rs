use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chunk::ReverseChunkBuffer;
use crate::config::FrameRate;
use crate::error::{ReverseError, SinkError};
use crate::frame::OutputClock;
use crate::io::{FinalizeCallback, FrameSink, FrameSource, OutputArtifact, ReadStatus, WriteStatus};
use crate::window::{ChunkWindowPlanner, TimeWindow};

/// Cooperative cancellation flag shared between a session handle and the
/// work it drives.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The sink has no room. Resume on its next readiness signal.
    Waiting,
    /// Every frame was handed over and end of input was signalled. The
    /// caller must now `finalize` the sink.
    Finalize,
}

/// Reads windows back to front and feeds their frames, reversed, to a sink
/// that pulls them.
pub struct ReversePipeline<S, K> {
    source: S,
    sink: K,
    planner: ChunkWindowPlanner,
    buffer: ReverseChunkBuffer,
    clock: OutputClock,
    cancel: CancelToken,
    session_started: bool,
    marked_final: bool,
    input_finished: bool,
    windows_read: usize,
}

impl<S: FrameSource, K: FrameSink> ReversePipeline<S, K> {
    pub fn new(
        source: S,
        sink: K,
        planner: ChunkWindowPlanner,
        rate: FrameRate,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            sink,
            planner,
            buffer: ReverseChunkBuffer::new(),
            clock: OutputClock::new(rate),
            cancel,
            session_started: false,
            marked_final: false,
            input_finished: false,
            windows_read: 0,
        }
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    pub fn frames_emitted(&self) -> u64 {
        self.clock.frames_emitted()
    }

    pub fn windows_read(&self) -> usize {
        self.windows_read
    }

    /// Reads the last window of the asset into the buffer.
    pub fn start(&mut self) -> Result<(), ReverseError> {
        let window = self
            .planner
            .next_window()
            .ok_or(ReverseError::NothingToRead)?;
        self.read_window(window)
    }

    fn read_window(&mut self, window: TimeWindow) -> Result<(), ReverseError> {
        self.source
            .prepare(window)
            .map_err(ReverseError::ReadFailed)?;
        self.buffer.reset(window);
        self.windows_read += 1;

        while !self.cancel.is_cancelled() {
            let batch = self.source.pull_available_frames();
            if batch.is_empty() {
                break;
            }
            self.buffer.extend(batch);
        }

        match self.source.status() {
            ReadStatus::Reading | ReadStatus::Completed => {
                log::debug!(
                    "window {window}: {} frames, {} KiB buffered",
                    self.buffer.len(),
                    self.buffer.byte_size() / 1024
                );
                Ok(())
            }
            ReadStatus::Cancelled => Err(ReverseError::Cancelled),
            ReadStatus::Failed(e) => Err(ReverseError::ReadFailed(e)),
        }
    }

    /// Handles one readiness signal from the sink. Hands over frames until
    /// the sink is saturated or the asset is exhausted.
    pub fn on_ready(&mut self) -> Result<Progress, ReverseError> {
        if self.input_finished {
            return Ok(Progress::Waiting);
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(ReverseError::Cancelled);
            }
            match self.sink.status() {
                WriteStatus::Writing => {}
                WriteStatus::Failed => return Err(self.write_failure()),
                WriteStatus::Cancelled => return Err(ReverseError::Cancelled),
                WriteStatus::Completed => {
                    return Err(ReverseError::Internal(
                        "sink completed before end of input".into(),
                    ))
                }
            }
            if !self.sink.is_ready() {
                return Ok(Progress::Waiting);
            }

            match self.buffer.next() {
                Some(frame) => {
                    let timestamp = self.clock.peek();
                    if !self.session_started {
                        log::debug!("starting output session at {}", timestamp.value);
                        self.sink.start_output_session(timestamp);
                        self.session_started = true;
                    }
                    if self.sink.append(&frame, timestamp) {
                        self.clock.advance();
                        continue;
                    }

                    self.buffer.unread(frame);
                    return match self.sink.status() {
                        WriteStatus::Writing => Ok(Progress::Waiting),
                        WriteStatus::Failed => Err(self.write_failure()),
                        WriteStatus::Cancelled => Err(ReverseError::Cancelled),
                        WriteStatus::Completed => Err(ReverseError::Internal(
                            "sink rejected a frame after completing".into(),
                        )),
                    };
                }
                None => match self.source.status() {
                    ReadStatus::Reading => self.advance()?,
                    ReadStatus::Completed => return self.finish_input(),
                    ReadStatus::Cancelled => return Err(ReverseError::Cancelled),
                    ReadStatus::Failed(e) => return Err(ReverseError::ReadFailed(e)),
                },
            }
        }
    }

    fn advance(&mut self) -> Result<(), ReverseError> {
        match self.planner.next_window() {
            Some(window) => self.read_window(window),
            None if self.marked_final => Err(ReverseError::Internal(
                "source still reading after the final window".into(),
            )),
            None => {
                log::debug!("reached start of asset after {} windows", self.windows_read);
                self.source.mark_final();
                self.marked_final = true;
                Ok(())
            }
        }
    }

    fn finish_input(&mut self) -> Result<Progress, ReverseError> {
        if self.clock.frames_emitted() == 0 {
            return Err(ReverseError::NothingToRead);
        }
        self.sink.mark_finished();
        self.input_finished = true;
        Ok(Progress::Finalize)
    }

    pub fn finalize(&mut self, done: FinalizeCallback) {
        self.sink.finalize(done);
    }

    /// Terminal outcome once the sink has settled after `finalize`.
    pub fn outcome(&self, output_path: &Path) -> Result<OutputArtifact, ReverseError> {
        if self.cancel.is_cancelled() {
            return Err(ReverseError::Cancelled);
        }
        match self.sink.status() {
            WriteStatus::Completed => Ok(OutputArtifact {
                path: output_path.to_path_buf(),
                frames: self.clock.frames_emitted(),
                duration: self.clock.elapsed(),
            }),
            WriteStatus::Failed => Err(self.write_failure()),
            WriteStatus::Cancelled => Err(ReverseError::Cancelled),
            WriteStatus::Writing => Err(ReverseError::Internal(
                "sink settled while still writing".into(),
            )),
        }
    }

    pub fn cancel(&mut self) {
        self.source.cancel();
        self.sink.cancel();
    }

    fn write_failure(&self) -> ReverseError {
        ReverseError::WriteFailed(
            self.sink
                .error()
                .unwrap_or_else(|| SinkError::new("sink failed without reporting an error")),
        )
    }
}
