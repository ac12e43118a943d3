// zelland library: shared between the daemon, the trigger CLI, and the mock device

// Daemon core (assets, sidecar store, envelope protocol, session registry, HTTP surface)
pub mod daemon;

// Error taxonomy shared by every module
pub mod error;

// tracing subscriber setup
pub mod logging;

// Async polling helpers for tests
#[cfg(test)]
pub mod test_utils;

pub use error::{Error, Result};
