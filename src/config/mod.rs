//! Configuration Module
//!
//! Handles client configuration loading and defaults.

pub mod loader;
pub mod settings;

pub use loader::ConfigLoader;
pub use settings::{ClientConfig, GatewayPaths, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HEARTBEAT_SECS, DEFAULT_TIMEOUT_MS};
