use std::fmt;
use std::time::Duration;

/// Half-open time range `[start, start + length)` of the source asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start: Duration,
    pub length: Duration,
}

impl TimeWindow {
    pub fn new(start: Duration, length: Duration) -> Self {
        Self { start, length }
    }

    pub fn end(&self) -> Duration {
        self.start + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length.is_zero()
    }

    pub fn contains(&self, t: Duration) -> bool {
        t >= self.start && t < self.end()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.3}s, {:.3}s)",
            self.start.as_secs_f64(),
            self.end().as_secs_f64()
        )
    }
}

/// Carves `[0, duration)` into windows of `step`, handed out back to front.
#[derive(Debug, Clone)]
pub struct ChunkWindowPlanner {
    step: Duration,
    end: Duration,
}

impl ChunkWindowPlanner {
    pub fn new(duration: Duration, step: Duration) -> Self {
        Self {
            step,
            end: duration,
        }
    }

    /// The window ending where the previous one started, or `None` once the
    /// beginning of the asset has been reached.
    pub fn next_window(&mut self) -> Option<TimeWindow> {
        if self.end.is_zero() || self.step.is_zero() {
            return None;
        }
        let start = self.end.saturating_sub(self.step);
        let window = TimeWindow::new(start, self.end - start);
        self.end = start;
        Some(window)
    }
}

impl Iterator for ChunkWindowPlanner {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        self.next_window()
    }
}
