//! Tracing initialization for the CLI.
//!
//! The core only emits `tracing` events; installing a subscriber is the
//! binary's job. Logs go to stderr so stdout stays clean for any future
//! machine-readable output.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber with the given filter directive,
/// falling back to `info` if the directive does not parse.
pub fn init(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
