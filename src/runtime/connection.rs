//! Per-client connection and its protocol state machine.
//!
//! A connection owns its socket, one inbound and one outbound staging
//! buffer, and two rectangle cursors: `multi_recv` (pixels still expected
//! from the client) and `multi_send` (pixels still owed to the client).
//! While either cursor is active the connection is mid-command.
//!
//! `step` advances a connection by a bounded amount of work. Per call it
//! performs at most one socket read, at most one socket write and draws at
//! most one pixel, so a single busy client cannot starve the others.

use crate::canvas::{Canvas, Color};
use crate::runtime::buffer::{ReadStatus, StagingBuffer};
use crate::runtime::protocol::{self, Opcode, COMMAND_LEN, INFO_LEN, PIXEL_LEN};
use crate::runtime::rect::RectIter;
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, info};

const READ_LIMIT: u32 = 1;
const DRAW_LIMIT: u32 = 1;

/// Non-fatal result of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Keep the connection.
    Open,
    /// The peer closed its side.
    End,
}

/// Fatal, connection-scoped failure.
#[derive(Debug)]
pub enum ConnectionError {
    /// Socket error other than would-block.
    Io(io::Error),
    /// First byte of a command is not a known opcode.
    UnknownOpcode(u8),
    /// A rectangle receive started while another one is active.
    RectInFlight,
    /// A peeked command could not be consumed.
    ReserveAfterPeek,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "socket error: {}", e),
            ConnectionError::UnknownOpcode(op) => write!(f, "unknown opcode 0x{:02x}", op),
            ConnectionError::RectInFlight => {
                write!(f, "rectangle receive started while one is active")
            }
            ConnectionError::ReserveAfterPeek => write!(f, "peeked command vanished"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

/// Why a connection left the pool.
#[derive(Debug)]
pub enum CloseReason {
    Error(ConnectionError),
    PeerClosed,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Error(e) => write!(f, "{}", e),
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Where the colors of the active rectangle receive come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvSource {
    /// Each cell has its own payload on the wire.
    Individual,
    /// The next payload is the fill color.
    FillPending,
    /// Every remaining cell gets this color.
    Fill(Color),
}

/// Per-session counters, logged when the connection closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub set_commands: u64,
    pub get_commands: u64,
    pub rect_pixels_received: u64,
    pub pixels_sent: u64,
    pub outside_canvas: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_syscalls: u64,
    pub write_syscalls: u64,
    pub write_would_block: u64,
}

/// Work still allowed in the current step.
struct Budget {
    reads: u32,
    draws: u32,
}

enum Fetch<T> {
    Ready(T),
    Pending,
    Closed,
}

/// A single client connection.
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    started_at: DateTime<Utc>,
    recv: StagingBuffer,
    send: StagingBuffer,
    multi_recv: RectIter,
    multi_send: RectIter,
    recv_source: RecvSource,
    stats: SessionStats,
}

impl<S: Read + Write> Connection<S> {
    /// Wrap an accepted, non-blocking stream.
    pub fn new(stream: S, peer: SocketAddr, buffer_size: usize) -> Self {
        Self {
            stream,
            peer,
            started_at: Utc::now(),
            recv: StagingBuffer::new(buffer_size),
            send: StagingBuffer::new(buffer_size),
            multi_recv: RectIter::default(),
            multi_send: RectIter::default(),
            recv_source: RecvSource::Individual,
            stats: SessionStats::default(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// True while a rectangle transfer is active in either direction.
    pub fn is_mid_command(&self) -> bool {
        !self.multi_recv.is_done() || !self.multi_send.is_done()
    }

    /// Advance the connection by one bounded unit of work.
    pub fn step(&mut self, canvas: &Canvas) -> Result<StepStatus, ConnectionError> {
        let mut budget = Budget {
            reads: READ_LIMIT,
            draws: DRAW_LIMIT,
        };

        loop {
            self.drain_multi_send(canvas);

            while !self.multi_recv.is_done() && budget.draws > 0 {
                let color = match self.recv_source {
                    RecvSource::Fill(color) => color,
                    source => {
                        let payload = match self.pull::<PIXEL_LEN>(&mut budget, true)? {
                            Fetch::Ready(payload) => payload,
                            Fetch::Pending => return self.flush(),
                            Fetch::Closed => return Ok(StepStatus::End),
                        };
                        let color = protocol::decode_color(&payload);
                        if source == RecvSource::FillPending {
                            self.recv_source = RecvSource::Fill(color);
                        }
                        color
                    }
                };

                let (x, y) = self.multi_recv.current();
                self.multi_recv.advance();
                self.draw(canvas, x, y, color);
                self.stats.rect_pixels_received += 1;
                budget.draws -= 1;
            }
            if !self.multi_recv.is_done() {
                return self.flush();
            }

            // Both cursors are idle (or multi_send is waiting for room), so
            // the next top-level command may start. Peek: it might not be
            // serviceable yet.
            let header = match self.pull::<COMMAND_LEN>(&mut budget, false)? {
                Fetch::Ready(header) => header,
                Fetch::Pending => return self.flush(),
                Fetch::Closed => return Ok(StepStatus::End),
            };

            let Some(opcode) = Opcode::from_byte(header[0]) else {
                return Err(ConnectionError::UnknownOpcode(header[0]));
            };

            match opcode {
                Opcode::SetPixel => {
                    if budget.draws == 0 {
                        return self.flush();
                    }
                    let (x, y, color) = protocol::decode_set_pixel(&header);
                    self.draw(canvas, x, y, color);
                    self.stats.set_commands += 1;
                    budget.draws -= 1;
                }
                Opcode::GetPixel => {
                    if !self.multi_send.is_done() {
                        return self.flush();
                    }
                    let (x, y) = protocol::decode_point(&header);
                    let pixel = canvas.get_pixel(x, y);
                    match self.send.write_reserve(PIXEL_LEN) {
                        Some(out) => protocol::encode_pixel(out, pixel),
                        None => return self.flush(),
                    }
                    if pixel.is_none() {
                        self.stats.outside_canvas += 1;
                    }
                    self.stats.get_commands += 1;
                    self.stats.pixels_sent += 1;
                }
                Opcode::ReceiveRect | Opcode::FillRect => {
                    if !self.multi_recv.is_done() {
                        return Err(ConnectionError::RectInFlight);
                    }
                    self.recv_source = if opcode == Opcode::ReceiveRect {
                        RecvSource::Individual
                    } else {
                        RecvSource::FillPending
                    };
                    self.multi_recv = protocol::decode_rect(&header);
                }
                Opcode::SendRect => {
                    if !self.multi_send.is_done() {
                        return self.flush();
                    }
                    self.multi_send = protocol::decode_rect(&header);
                }
                Opcode::Info => {
                    if !self.multi_send.is_done() {
                        return self.flush();
                    }
                    let capacity = u32::try_from(self.recv.capacity()).unwrap_or(u32::MAX);
                    match self.send.write_reserve(INFO_LEN) {
                        Some(out) => {
                            protocol::encode_info(out, canvas.width(), canvas.height(), capacity)
                        }
                        None => return self.flush(),
                    }
                }
            }

            if self.recv.read_reserve(COMMAND_LEN).is_none() {
                return Err(ConnectionError::ReserveAfterPeek);
            }
        }
    }

    /// Log the session summary and release the socket.
    pub fn close(self, reason: &CloseReason) {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - self.started_at).num_milliseconds();
        let s = self.stats;

        info!(
            peer = %self.peer,
            reason = %reason,
            started_at = %self.started_at.to_rfc3339(),
            duration_ms,
            set_commands = s.set_commands,
            get_commands = s.get_commands,
            rect_pixels_received = s.rect_pixels_received,
            pixels_sent = s.pixels_sent,
            outside_canvas = s.outside_canvas,
            bytes_read = s.bytes_read,
            bytes_written = s.bytes_written,
            read_syscalls = s.read_syscalls,
            write_syscalls = s.write_syscalls,
            write_would_block = s.write_would_block,
            "Connection closed"
        );
        if self.is_mid_command() {
            debug!(
                peer = %self.peer,
                abandoned_recv = self.multi_recv.remaining(),
                abandoned_send = self.multi_send.remaining(),
                "Abandoned rectangle transfer"
            );
        }
    }

    /// Queue as many pending rectangle pixels as fit in the send buffer.
    fn drain_multi_send(&mut self, canvas: &Canvas) {
        while !self.multi_send.is_done() {
            let Some(out) = self.send.write_reserve(PIXEL_LEN) else {
                break;
            };
            let (x, y) = self.multi_send.current();
            let pixel = canvas.get_pixel(x, y);
            protocol::encode_pixel(out, pixel);
            self.multi_send.advance();
            if pixel.is_none() {
                self.stats.outside_canvas += 1;
            }
            self.stats.pixels_sent += 1;
        }
    }

    fn draw(&mut self, canvas: &Canvas, x: u32, y: u32, color: Color) {
        if !canvas.set_pixel(x, y, color) {
            self.stats.outside_canvas += 1;
        }
    }

    /// Get `N` inbound bytes, reading from the socket once if the budget
    /// allows and not enough is buffered. `consume` selects reserve vs peek.
    fn pull<const N: usize>(
        &mut self,
        budget: &mut Budget,
        consume: bool,
    ) -> Result<Fetch<[u8; N]>, ConnectionError> {
        if self.recv.len() < N && budget.reads > 0 {
            budget.reads -= 1;
            self.stats.read_syscalls += 1;
            match self.recv.read_from(&mut self.stream)? {
                ReadStatus::Data(n) => self.stats.bytes_read += n as u64,
                ReadStatus::WouldBlock => {}
                ReadStatus::Closed => return Ok(Fetch::Closed),
            }
        }

        let bytes = if consume {
            self.recv.read_reserve(N)
        } else {
            self.recv.read_peek(N)
        };
        Ok(match bytes {
            Some(bytes) => {
                let mut out = [0u8; N];
                out.copy_from_slice(bytes);
                Fetch::Ready(out)
            }
            None => Fetch::Pending,
        })
    }

    /// One write attempt for whatever is queued; ends the step.
    fn flush(&mut self) -> Result<StepStatus, ConnectionError> {
        if !self.send.is_empty() {
            self.stats.write_syscalls += 1;
            let sent = self.send.write_to(&mut self.stream)?;
            if sent == 0 {
                self.stats.write_would_block += 1;
            }
            self.stats.bytes_written += sent as u64;
        }
        Ok(StepStatus::Open)
    }
}
