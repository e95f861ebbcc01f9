//! Per-connection byte staging buffers.
//!
//! A `StagingBuffer` shuttles bytes between a non-blocking socket and the
//! protocol decoder/encoder. Bytes in `[read_pos, write_pos)` are valid and
//! not yet consumed (inbound) or not yet sent (outbound).
//!
//! Each socket call issues exactly one syscall, which is what lets the
//! worker bound the amount of I/O a single connection does per round.
//! The buffer is compacted before every socket read and after every socket
//! write so the next operation sees as much contiguous space as possible.

use std::io::{self, Read, Write};

/// Outcome of a single non-blocking read into a staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many bytes were appended.
    Data(usize),
    /// Nothing available right now.
    WouldBlock,
    /// The peer shut down its write side.
    Closed,
}

/// Fixed-capacity byte store with separate read and write cursors.
pub struct StagingBuffer {
    data: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
}

impl StagingBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes not yet consumed.
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free bytes after the write cursor (not counting reclaimable space
    /// in front of the read cursor).
    pub fn write_space(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Move the valid bytes to offset 0.
    pub fn compact(&mut self) {
        if self.read_pos > 0 {
            let len = self.len();
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = len;
        }
    }

    /// Consume the next `n` bytes, or `None` if fewer are buffered.
    pub fn read_reserve(&mut self, n: usize) -> Option<&[u8]> {
        if self.len() < n {
            return None;
        }
        let start = self.read_pos;
        self.read_pos += n;
        Some(&self.data[start..start + n])
    }

    /// Look at the next `n` bytes without consuming them.
    pub fn read_peek(&self, n: usize) -> Option<&[u8]> {
        if self.len() < n {
            return None;
        }
        Some(&self.data[self.read_pos..self.read_pos + n])
    }

    /// Claim `n` bytes after the write cursor for the caller to fill.
    ///
    /// Does not compact; space freed by a flush is already reclaimed
    /// because `write_to` compacts.
    pub fn write_reserve(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.write_space() < n {
            return None;
        }
        let start = self.write_pos;
        self.write_pos += n;
        Some(&mut self.data[start..start + n])
    }

    /// Issue one non-blocking read from `src` into the free tail.
    pub fn read_from<R: Read>(&mut self, src: &mut R) -> io::Result<ReadStatus> {
        self.compact();
        debug_assert!(self.write_space() > 0, "read_from called on a full buffer");
        if self.write_space() == 0 {
            // a zero-length read would look like EOF
            return Ok(ReadStatus::WouldBlock);
        }

        match src.read(&mut self.data[self.write_pos..]) {
            Ok(0) => Ok(ReadStatus::Closed),
            Ok(n) => {
                self.write_pos += n;
                Ok(ReadStatus::Data(n))
            }
            Err(ref e) if is_transient(e) => Ok(ReadStatus::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// Issue one non-blocking write of the pending bytes to `dst`.
    ///
    /// Returns the number of bytes the socket accepted; a would-block
    /// yields `Ok(0)`.
    pub fn write_to<W: Write>(&mut self, dst: &mut W) -> io::Result<usize> {
        debug_assert!(!self.is_empty(), "write_to called on an empty buffer");
        if self.is_empty() {
            return Ok(0);
        }

        let sent = match dst.write(&self.data[self.read_pos..self.write_pos]) {
            Ok(n) => n,
            Err(ref e) if is_transient(e) => 0,
            Err(e) => return Err(e),
        };
        self.read_pos += sent;
        // after the write, fewer bytes are left to move
        self.compact();
        Ok(sent)
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
