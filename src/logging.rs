//! Logging Setup
//!
//! The library only emits `tracing` events. Applications without their own
//! subscriber can install a formatted one here.

use crate::error::{MfpError, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "MFP_LOG";

/// Install a fmt subscriber filtered by `MFP_LOG` (default `info`)
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| MfpError::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
