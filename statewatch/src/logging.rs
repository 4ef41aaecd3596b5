//! Tracing setup for the `statewatch` binary.
//!
//! Everything the monitor reports goes through `tracing`: anchor misses at
//! `debug` (escalated to `warn` after repeated misses), transitions and ticks
//! at `info`, configuration problems at `error`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn` if unset. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=statewatch=debug statewatch run --config statewatch.toml
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
