//! Tracing setup for the server bins.
//!
//! The stdio bin logs JSON-per-line to stderr (stdout is the protocol
//! channel); the HTTP bin uses the compact human format. Both honor
//! `RUST_LOG`.

use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// JSON diagnostics on stderr; stdout stays clean for the protocol.
pub fn init_stdio_logging() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_current_span(false)
        .try_init();
}

/// Compact human-readable diagnostics for the HTTP server.
pub fn init_http_logging() {
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter())
        .try_init();
}
