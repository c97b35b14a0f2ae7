use std::sync::Arc;
use std::time::Duration;

use crate::config::FrameRate;

/// A decoded RGBA image and the presentation time it had in the source.
///
/// The source time only orders frames inside a window. It is never written
/// to the output. Pixel data is shared so a frame the sink rejects can be
/// offered again without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub pts: Duration,
    pub width: u32,
    pub height: u32,
    pub rgba_data: Arc<[u8]>,
}

impl RawFrame {
    pub fn byte_size(&self) -> usize {
        self.rgba_data.len()
    }
}

/// Output presentation time as `value / timescale` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputTimestamp {
    pub value: u64,
    pub timescale: u32,
}

impl OutputTimestamp {
    pub fn as_nanos(&self) -> u64 {
        (self.value as u128 * 1_000_000_000 / self.timescale as u128) as u64
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.as_nanos())
    }
}

/// Counts emitted frames and stamps them at a fixed rate.
///
/// Frame `n` is stamped `n * den / num`, so the first frame is always zero
/// and every step is exactly one tick.
#[derive(Debug, Clone)]
pub struct OutputClock {
    rate: FrameRate,
    frames_emitted: u64,
}

impl OutputClock {
    pub fn new(rate: FrameRate) -> Self {
        Self {
            rate,
            frames_emitted: 0,
        }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn is_first(&self) -> bool {
        self.frames_emitted == 0
    }

    /// Timestamp the next emitted frame will carry.
    pub fn peek(&self) -> OutputTimestamp {
        self.stamp(self.frames_emitted)
    }

    pub fn advance(&mut self) {
        self.frames_emitted += 1;
    }

    /// Total output duration covered by the frames emitted so far.
    pub fn elapsed(&self) -> Duration {
        self.stamp(self.frames_emitted).as_duration()
    }

    fn stamp(&self, frame: u64) -> OutputTimestamp {
        OutputTimestamp {
            value: frame * self.rate.den as u64,
            timescale: self.rate.num,
        }
    }
}
