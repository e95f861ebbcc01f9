//! Shared pixel canvas.
//!
//! The canvas is written by the network worker and read concurrently by
//! the supervisor (and any future presentation path). Every cell is a
//! single `AtomicU32` holding `0x00RRGGBB`, so a pixel is never observed
//! half-written. No ordering is promised between different cells: a reader
//! scanning a region while a rectangle is being drawn may see a mix of old
//! and new pixels.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// An RGB color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    fn pack(self) -> u32 {
        u32::from_be_bytes([0, self.r, self.g, self.b])
    }

    fn unpack(word: u32) -> Self {
        let [_, r, g, b] = word.to_be_bytes();
        Self { r, g, b }
    }
}

/// Fixed-size grid of RGB cells.
pub struct Canvas {
    cells: Box<[AtomicU32]>,
    width: u32,
    height: u32,
    /// In-bounds `set_pixel` calls since startup
    writes: AtomicU64,
}

impl Canvas {
    /// Create a black canvas of `width` x `height` pixels.
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        let cells = (0..len).map(|_| AtomicU32::new(0)).collect();

        Self {
            cells,
            width,
            height,
            writes: AtomicU64::new(0),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of in-bounds pixel writes so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.width && y < self.height {
            Some(y as usize * self.width as usize + x as usize)
        } else {
            None
        }
    }

    /// Set a pixel. Returns `false` (and does nothing) when the coordinate
    /// lies outside the canvas.
    pub fn set_pixel(&self, x: u32, y: u32, color: Color) -> bool {
        match self.index(x, y) {
            Some(idx) => {
                self.cells[idx].store(color.pack(), Ordering::Relaxed);
                self.writes.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Read a pixel, or `None` when the coordinate lies outside the canvas.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.index(x, y)
            .map(|idx| Color::unpack(self.cells[idx].load(Ordering::Relaxed)))
    }
}
