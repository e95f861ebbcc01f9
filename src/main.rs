//! pixelflut-server: a shared pixel canvas over TCP
//!
//! Clients speak a compact binary protocol to:
//! - set and query single pixels
//! - stream rectangles of pixels in either direction
//! - fill a rectangle with one color
//! - query canvas and buffer dimensions
//!
//! A single worker thread services every connection in round-robin
//! rounds with non-blocking sockets and a bounded amount of work per
//! connection per round.

mod canvas;
mod config;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        width = config.width,
        height = config.height,
        max_connections = config.max_connections,
        buffer_size = config.buffer_size,
        stats_interval = config.stats_interval,
        "Starting pixelflut server"
    );

    runtime::run(config)?;
    Ok(())
}
