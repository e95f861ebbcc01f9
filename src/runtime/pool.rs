//! Dense, fixed-capacity pool of live connections.
//!
//! The first `len()` slots hold every live connection with no gaps.
//! New connections are appended; a closed connection is replaced by the
//! last entry (swap-removal), which keeps removal O(1) and the array dense.

use crate::canvas::Canvas;
use crate::runtime::connection::{CloseReason, Connection, StepStatus};
use crate::runtime::stats::ServerStats;
use std::io::{Read, Write};
use tracing::debug;

pub struct ConnectionPool<S> {
    connections: Vec<Connection<S>>,
    capacity: usize,
}

impl<S: Read + Write> ConnectionPool<S> {
    /// Create an empty pool holding at most `capacity` connections.
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a connection. Hands it back if the pool is full.
    pub fn insert(&mut self, conn: Connection<S>) -> Result<usize, Connection<S>> {
        if self.is_full() {
            return Err(conn);
        }
        self.connections.push(conn);
        Ok(self.connections.len() - 1)
    }

    /// Remove the connection at `index`; the last entry takes its slot.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn remove(&mut self, index: usize) -> Connection<S> {
        self.connections.swap_remove(index)
    }

    /// Step every live connection once, closing the ones that finished.
    ///
    /// Returns the number of connections closed during the round.
    pub fn service(&mut self, canvas: &Canvas, stats: &ServerStats) -> usize {
        let mut closed = 0;
        let mut i = 0;

        while i < self.connections.len() {
            let reason = match self.connections[i].step(canvas) {
                Ok(StepStatus::Open) => {
                    i += 1;
                    continue;
                }
                Ok(StepStatus::End) => CloseReason::PeerClosed,
                Err(e) => {
                    debug!(peer = %self.connections[i].peer(), error = %e, "Connection error");
                    CloseReason::Error(e)
                }
            };

            // Slot i now holds a connection that has not been stepped this
            // round, so do not advance.
            self.remove(i).close(&reason);
            stats.record_close();
            closed += 1;
        }

        closed
    }

    /// Close every remaining connection.
    pub fn drain(&mut self, stats: &ServerStats) {
        for conn in self.connections.drain(..) {
            conn.close(&CloseReason::Shutdown);
            stats.record_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Color;
    use crate::runtime::mock::MockStream;
    use crate::runtime::protocol::client;
    use std::net::SocketAddr;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn add(
        pool: &mut ConnectionPool<MockStream>,
        stats: &ServerStats,
        port: u16,
    ) -> MockStream {
        let stream = MockStream::new();
        pool.insert(Connection::new(stream.clone(), peer(port), 64))
            .unwrap_or_else(|_| panic!("pool full"));
        stats.record_accept();
        stream
    }

    fn peers(pool: &ConnectionPool<MockStream>) -> Vec<u16> {
        pool.connections
            .iter()
            .map(|conn| conn.peer().port())
            .collect()
    }

    #[test]
    fn test_insert_until_full() {
        let mut pool = ConnectionPool::new(2);
        let stats = ServerStats::new();
        add(&mut pool, &stats, 1);
        add(&mut pool, &stats, 2);
        assert!(pool.is_full());

        let extra = Connection::new(MockStream::new(), peer(3), 64);
        let rejected = pool.insert(extra).err().unwrap();
        assert_eq!(rejected.peer(), peer(3));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_swap_remove() {
        let mut pool = ConnectionPool::new(4);
        let stats = ServerStats::new();
        for port in 1..=4 {
            add(&mut pool, &stats, port);
        }

        let removed = pool.remove(1);
        assert_eq!(removed.peer().port(), 2);
        assert_eq!(peers(&pool), vec![1, 4, 3]);

        // removing the last entry moves nothing
        pool.remove(2);
        assert_eq!(peers(&pool), vec![1, 4]);
    }

    #[test]
    fn test_service_revisits_swapped_slot() {
        let canvas = Canvas::new(16, 16);
        let stats = ServerStats::new();
        let mut pool = ConnectionPool::new(4);

        let a = add(&mut pool, &stats, 1);
        let b = add(&mut pool, &stats, 2);
        let c = add(&mut pool, &stats, 3);
        a.close_inbound();
        c.push_inbound(&client::set_pixel(5, 5, Color::new(1, 2, 3)));

        let closed = pool.service(&canvas, &stats);
        assert_eq!(closed, 1);
        assert_eq!(peers(&pool), vec![3, 2]);

        // c moved into a's slot and was still serviced, exactly once
        assert_eq!(canvas.get_pixel(5, 5), Some(Color::new(1, 2, 3)));
        assert_eq!(a.reads(), 1);
        assert_eq!(b.reads(), 1);
        assert_eq!(c.reads(), 1);
        assert_eq!(stats.snapshot().active, 2);
    }

    #[test]
    fn test_service_closes_consecutive_and_last() {
        let canvas = Canvas::new(16, 16);
        let stats = ServerStats::new();
        let mut pool = ConnectionPool::new(8);

        let streams: Vec<_> = (1..=5).map(|port| add(&mut pool, &stats, port)).collect();
        // close 1, 4 and 5: 5 is swapped into slot 0 and closes there too
        streams[0].close_inbound();
        streams[3].fail_with(std::io::ErrorKind::ConnectionReset);
        streams[4].push_inbound(b"?garbage");

        let closed = pool.service(&canvas, &stats);
        assert_eq!(closed, 3);
        assert_eq!(peers(&pool), vec![3, 2]);
        for stream in &streams {
            assert_eq!(stream.reads(), 1);
        }
        assert_eq!(stats.snapshot().closed, 3);
    }

    #[test]
    fn test_error_is_isolated() {
        let canvas = Canvas::new(16, 16);
        let stats = ServerStats::new();
        let mut pool = ConnectionPool::new(4);

        let bad = add(&mut pool, &stats, 1);
        let good = add(&mut pool, &stats, 2);
        bad.push_inbound(b"Z1234567");
        good.push_inbound(&client::set_pixel(0, 0, Color::new(7, 7, 7)));
        good.push_inbound(&client::get_pixel(0, 0));

        pool.service(&canvas, &stats);
        assert_eq!(peers(&pool), vec![2]);
        assert_eq!(good.outbound(), vec![7, 7, 7, 1]);
    }

    #[test]
    fn test_drain() {
        let stats = ServerStats::new();
        let mut pool = ConnectionPool::new(4);
        add(&mut pool, &stats, 1);
        add(&mut pool, &stats, 2);

        pool.drain(&stats);
        assert!(pool.is_empty());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.active, 0);
        assert_eq!(snapshot.closed, 2);
    }
}
