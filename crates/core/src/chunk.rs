use crate::frame::RawFrame;
use crate::window::TimeWindow;

/// Frames of one window, stored in the order the source produced them and
/// served last to first.
///
/// `reading_index` counts frames already served. The frame served next is
/// `buffer[len - 1 - reading_index]`.
#[derive(Debug, Default)]
pub struct ReverseChunkBuffer {
    window: Option<TimeWindow>,
    frames: Vec<RawFrame>,
    reading_index: usize,
    total_bytes: usize,
}

impl ReverseChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every buffered frame and rewinds the cursor for `window`.
    pub fn reset(&mut self, window: TimeWindow) {
        self.frames.clear();
        self.reading_index = 0;
        self.total_bytes = 0;
        self.window = Some(window);
    }

    pub fn window(&self) -> Option<TimeWindow> {
        self.window
    }

    pub fn append(&mut self, frame: RawFrame) {
        debug_assert_eq!(self.reading_index, 0, "append after serving started");
        self.total_bytes += frame.byte_size();
        self.frames.push(frame);
    }

    pub fn extend(&mut self, frames: impl IntoIterator<Item = RawFrame>) {
        for frame in frames {
            self.append(frame);
        }
    }

    /// Next frame in reverse order, or `None` once the window is exhausted.
    pub fn next(&mut self) -> Option<RawFrame> {
        let frame = self.frames.pop()?;
        self.reading_index += 1;
        self.total_bytes -= frame.byte_size();
        Some(frame)
    }

    /// Returns the most recently served frame so it is served again next.
    pub fn unread(&mut self, frame: RawFrame) {
        debug_assert!(self.reading_index > 0);
        self.reading_index = self.reading_index.saturating_sub(1);
        self.total_bytes += frame.byte_size();
        self.frames.push(frame);
    }

    pub fn reading_index(&self) -> usize {
        self.reading_index
    }

    /// Frames read for the current window, served or not.
    pub fn len(&self) -> usize {
        self.frames.len() + self.reading_index
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_exhausted(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bytes held by frames not yet served.
    pub fn byte_size(&self) -> usize {
        self.total_bytes
    }
}
