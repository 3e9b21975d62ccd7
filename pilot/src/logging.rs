//! Tracing setup for the pilot binary.
//!
//! Step lifecycle is logged at `info`, soft failures (ignored parameters,
//! unknown step types) at `warn`, payloads at `debug`. The run report written
//! by `pilot run --report` is the durable record; logs are not persisted.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber.
///
/// Reads `RUST_LOG`; defaults to `pilot=info` so step progress is visible.
///
/// # Example
/// ```bash
/// RUST_LOG=pilot=debug pilot run "reply to Li"
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pilot=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
