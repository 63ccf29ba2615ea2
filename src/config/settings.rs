//! Client Settings
//!
//! Defines the configuration schema for a gateway session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default timeout for procedure invocations, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default connect timeout, in milliseconds; below the request timeout so an
/// unreachable host is reported as such
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default heartbeat interval, in seconds
pub const DEFAULT_HEARTBEAT_SECS: i64 = 420;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway URL (protocol, host, port and context path)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<Url>,

    /// Request timeout applied when invocation options carry none (0 disables)
    pub default_timeout_ms: u64,

    /// TCP/TLS connect timeout for the default transport
    pub connect_timeout_ms: u64,

    /// How many times a connection failure is retried before giving up
    pub connect_retries: u32,

    /// Keep-alive interval; zero or negative disables the heartbeat
    pub heartbeat_interval_secs: i64,

    /// Upper bound on challenge/retry rounds for a single request
    pub max_challenge_rounds: u32,

    /// Certificate whose public key is pinned at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_certificate: Option<PathBuf>,

    /// Headers sent with every request
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub global_headers: BTreeMap<String, String>,

    /// User agent for the default transport
    pub user_agent: String,

    /// Gateway paths, relative to the server URL
    pub paths: GatewayPaths,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            connect_retries: 2,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
            max_challenge_rounds: 3,
            pinned_certificate: None,
            global_headers: BTreeMap::new(),
            user_agent: format!("mfp-client/{}", env!("CARGO_PKG_VERSION")),
            paths: GatewayPaths::default(),
        }
    }
}

impl ClientConfig {
    /// Default timeout as an optional duration (`None` when disabled)
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_ms > 0).then(|| Duration::from_millis(self.default_timeout_ms))
    }

    /// Connect timeout for the transport
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Paths of the gateway services the client talks to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayPaths {
    /// Prefix for adapter procedures: `{adapters}/{adapter}/{procedure}`
    pub adapters: String,

    /// Keep-alive endpoint
    pub heartbeat: String,

    /// Device registration resource holding the display name
    pub registration: String,
}

impl Default for GatewayPaths {
    fn default() -> Self {
        Self {
            adapters: "api/adapters".to_string(),
            heartbeat: "api/heartbeat".to_string(),
            registration: "api/registration/v1/self".to_string(),
        }
    }
}
