//! Lazy row-major walk over a rectangle of canvas coordinates.

use tracing::warn;

/// Cursor over `[xstart, xstop) x [ystart, ystop)`, x varying fastest.
///
/// The default value is an empty, already finished rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RectIter {
    xstart: u32,
    ystart: u32,
    xstop: u32,
    ystop: u32,
    x: u32,
    y: u32,
}

impl RectIter {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            xstart: x,
            ystart: y,
            xstop: x + width,
            ystop: y + height,
            x,
            y,
        }
    }

    pub fn is_done(&self) -> bool {
        self.y == self.ystop || self.xstart == self.xstop
    }

    /// The coordinate the cursor currently points at.
    pub fn current(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    /// Cells not yet visited.
    pub fn remaining(&self) -> u64 {
        if self.is_done() {
            return 0;
        }
        let width = u64::from(self.xstop - self.xstart);
        let full_rows = u64::from(self.ystop - self.y - 1);
        full_rows * width + u64::from(self.xstop - self.x)
    }

    /// Step to the next cell. Calling this on a finished iterator is a
    /// caller bug; it is logged and ignored.
    pub fn advance(&mut self) {
        if self.is_done() {
            warn!("advance called on a finished rectangle");
            return;
        }
        self.x += 1;
        if self.x == self.xstop {
            self.x = self.xstart;
            self.y += 1;
        }
    }
}

impl Iterator for RectIter {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_done() {
            return None;
        }
        let pos = self.current();
        self.advance();
        Some(pos)
    }
}
