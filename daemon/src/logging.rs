//! Logging setup for the daemon and its companion binaries
//!
//! Everything goes to stderr through `tracing-subscriber`. `RUST_LOG` wins over
//! the configured level when it is set.

use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Install the global subscriber.
///
/// Returns an error string when a subscriber is already installed.
pub fn init(level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| e.to_string())?;

    tracing::debug!(level = %level, "Logging initialized");
    Ok(())
}

/// Initialize logging for tests (captured by the test harness)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}
