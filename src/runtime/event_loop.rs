//! Cooperative polling loop.
//!
//! One worker thread owns the listener and the connection pool. Each round
//! it tries one non-blocking accept, then steps every live connection once.
//! There is no readiness notification: every socket call is an
//! opportunistic non-blocking syscall, and would-block just means "nothing
//! this round". Cost per round is linear in the number of connections,
//! which is fine for pools of a few hundred.

use crate::canvas::Canvas;
use crate::config::Config;
use crate::runtime::connection::Connection;
use crate::runtime::pool::ConnectionPool;
use crate::runtime::stats::ServerStats;
use mio::net::{TcpListener, TcpStream};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Create the non-blocking listening socket.
pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(TcpListener::from_std(socket.into()))
}

/// Start the network worker. It runs until `shutdown` is set, then closes
/// every connection and the listener.
pub fn spawn(
    listener: TcpListener,
    config: &Config,
    canvas: Arc<Canvas>,
    stats: Arc<ServerStats>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let max_connections = config.max_connections;
    let buffer_size = config.buffer_size;

    thread::Builder::new()
        .name("net-worker".to_string())
        .spawn(move || {
            worker_loop(
                listener,
                max_connections,
                buffer_size,
                &canvas,
                &stats,
                &shutdown,
            )
        })
}

fn worker_loop(
    listener: TcpListener,
    max_connections: usize,
    buffer_size: usize,
    canvas: &Canvas,
    stats: &ServerStats,
    shutdown: &AtomicBool,
) {
    let mut pool: ConnectionPool<TcpStream> = ConnectionPool::new(max_connections);
    let mut accept_state = AcceptState::default();

    info!(max_connections, buffer_size, "Worker started");

    while !shutdown.load(Ordering::Acquire) {
        let accepted = accept_one(&listener, &mut pool, buffer_size, stats, &mut accept_state);
        pool.service(canvas, stats);

        if pool.is_empty() && !accepted {
            thread::yield_now();
        }
    }

    info!(active = pool.len(), "Worker draining connections");
    pool.drain(stats);
    drop(listener);
    info!("Worker stopped");
}

/// Tracks ongoing accept conditions so each one is logged once rather than
/// on every round.
#[derive(Debug, Default)]
struct AcceptState {
    pool_full: bool,
    failing: bool,
}

impl AcceptState {
    /// Returns true if the pool just became full.
    fn enter_full(&mut self) -> bool {
        !std::mem::replace(&mut self.pool_full, true)
    }

    /// Returns true if this error starts a new run of accept failures.
    fn enter_failing(&mut self) -> bool {
        !std::mem::replace(&mut self.failing, true)
    }

    fn accept_ok(&mut self) {
        self.failing = false;
    }
}

/// Accept at most one pending client. While the pool is full nothing is
/// accepted, so new clients wait in the kernel's accept queue.
fn accept_one(
    listener: &TcpListener,
    pool: &mut ConnectionPool<TcpStream>,
    buffer_size: usize,
    stats: &ServerStats,
    state: &mut AcceptState,
) -> bool {
    if pool.is_full() {
        if state.enter_full() {
            warn!(
                capacity = pool.capacity(),
                "Connection pool full, new clients wait in the accept queue"
            );
            stats.record_pool_full();
        }
        return false;
    }
    state.pool_full = false;

    match listener.accept() {
        Ok((stream, peer)) => {
            state.accept_ok();
            let Ok(slot) = pool.insert(Connection::new(stream, peer, buffer_size)) else {
                unreachable!("pool capacity is checked before accepting");
            };
            stats.record_accept();
            debug!(peer = %peer, slot, active = pool.len(), "Accepted connection");
            true
        }
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
            state.accept_ok();
            false
        }
        Err(e) => {
            if state.enter_failing() {
                error!(error = %e, "Accept error");
            } else {
                trace!(error = %e, "Accept error persists");
            }
            false
        }
    }
}
