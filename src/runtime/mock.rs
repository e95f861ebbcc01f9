//! Scripted in-memory stream for exercising the non-blocking I/O paths.
//!
//! Clones share state, so a test can keep a handle while the connection
//! owns another.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

#[derive(Default)]
struct Inner {
    inbound: VecDeque<u8>,
    eof: bool,
    fail: Option<io::ErrorKind>,
    outbound: Vec<u8>,
    /// Max bytes accepted per write call (`Some(0)` = would-block).
    write_limit: Option<usize>,
    reads: usize,
    writes: usize,
}

#[derive(Clone, Default)]
pub struct MockStream {
    inner: Rc<RefCell<Inner>>,
}

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `bytes` available to subsequent reads.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.inner.borrow_mut().inbound.extend(bytes);
    }

    /// Reads return EOF once the inbound queue is drained.
    pub fn close_inbound(&self) {
        self.inner.borrow_mut().eof = true;
    }

    /// Every subsequent read and write fails with `kind`.
    pub fn fail_with(&self, kind: io::ErrorKind) {
        self.inner.borrow_mut().fail = Some(kind);
    }

    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.inner.borrow_mut().write_limit = limit;
    }

    /// Everything written so far.
    pub fn outbound(&self) -> Vec<u8> {
        self.inner.borrow().outbound.clone()
    }

    pub fn reads(&self) -> usize {
        self.inner.borrow().reads
    }

    pub fn writes(&self) -> usize {
        self.inner.borrow().writes
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        inner.reads += 1;
        if let Some(kind) = inner.fail {
            return Err(io::Error::from(kind));
        }
        if inner.inbound.is_empty() {
            return if inner.eof {
                Ok(0)
            } else {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            };
        }

        let n = buf.len().min(inner.inbound.len());
        for (dst, src) in buf.iter_mut().zip(inner.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        inner.writes += 1;
        if let Some(kind) = inner.fail {
            return Err(io::Error::from(kind));
        }

        let n = inner.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        inner.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
