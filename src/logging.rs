//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem. Designed
//! for containerized deployments where logs go to stdout and the collector
//! handles shipping.
//!
//! Log lines for job processing always carry `request_id` as the first
//! structured field so a single request can be followed across the dispatch,
//! consumer, and report paths.

use std::io::IsTerminal;

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Log level comes from `RUST_LOG` (default `info`). Set `json_output` for
/// machine-readable logs in container environments; ANSI colors are enabled
/// only when stdout is a terminal.
///
/// Safe to call once per process; subsequent calls are ignored so tests can
/// initialize logging without coordinating.
pub fn init_tracing(json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(std::io::stdout().is_terminal());

    let result = if json_output {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // Already-set subscriber (tests, embedding binaries) is not an error.
    if let Err(err) = result {
        tracing::debug!("tracing subscriber already initialized: {err}");
    }
}
