// Daemon core for zelland
// Shared between the daemon binary, the trigger CLI, and the mock device

pub mod assets;
pub mod config;
pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod sidecar;
pub mod socket;
pub mod state;
pub mod tls;
