//! Process-wide tracing setup.
//!
//! Everything logs to stderr. Workers tag their lines through the `worker`
//! span; the detached daemon's stderr is the daemon log file.

use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the subscriber. Reads `RUST_LOG`, defaulting to `info`.
///
/// ```bash
/// RUST_LOG=hive=debug hive work
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .compact(),
        )
        .try_init();
}
