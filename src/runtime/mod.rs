//! Network runtime for the pixel server.
//!
//! Layout:
//! - `buffer`: per-connection staging buffers (one syscall per I/O call)
//! - `rect`: row-major rectangle cursor for batched transfers
//! - `protocol`: wire opcodes and encoding helpers
//! - `connection`: per-client state machine (`Connection::step`)
//! - `pool`: dense connection array with swap-removal
//! - `event_loop`: listener, worker thread and round loop
//!
//! The calling thread of `run` becomes the supervisor: it waits for a
//! termination signal, logs periodic stats, then stops and joins the worker.

mod buffer;
mod connection;
mod event_loop;
mod pool;
mod protocol;
mod rect;
mod stats;

#[cfg(test)]
mod mock;

use crate::canvas::Canvas;
use crate::config::Config;
use stats::ServerStats;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Interval;
use tracing::{error, info};

/// Run the server until SIGINT or SIGTERM.
pub fn run(config: Config) -> io::Result<()> {
    let canvas = Arc::new(Canvas::new(config.width, config.height));
    let stats = Arc::new(ServerStats::new());
    let shutdown = Arc::new(AtomicBool::new(false));

    let listener = event_loop::bind(config.listen, config.backlog)?;
    info!(
        addr = %listener.local_addr()?,
        width = config.width,
        height = config.height,
        max_connections = config.max_connections,
        buffer_size = config.buffer_size,
        "Listening"
    );

    let worker = event_loop::spawn(
        listener,
        &config,
        Arc::clone(&canvas),
        Arc::clone(&stats),
        Arc::clone(&shutdown),
    )?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let supervised = runtime.block_on(supervise(&canvas, &stats, config.stats_interval));

    info!("Shutting down");
    shutdown.store(true, Ordering::Release);
    if worker.join().is_err() {
        error!("Network worker panicked");
    }

    supervised
}

/// Wait for a termination signal, reporting stats every `interval_secs`
/// (never if zero).
async fn supervise(canvas: &Canvas, stats: &ServerStats, interval_secs: u64) -> io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut ticker = (interval_secs > 0).then(|| {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval
    });

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                info!("Received SIGINT");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM");
                return Ok(());
            }
            _ = tick(&mut ticker) => report(canvas, stats),
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn report(canvas: &Canvas, stats: &ServerStats) {
    let s = stats.snapshot();
    info!(
        active = s.active,
        accepted = s.accepted,
        closed = s.closed,
        rejected_full = s.rejected_full,
        canvas_writes = canvas.writes(),
        "Stats"
    );
}
