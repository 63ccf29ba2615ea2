//! Configuration Loader
//!
//! Loads client settings from built-in defaults, JSON files and the
//! environment. Files are deep-merged so a file only needs the keys it
//! overrides.

use crate::config::settings::ClientConfig;
use crate::error::{MfpError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "MFP_CLIENT_CONFIG";

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    merged: Value,
}

impl ConfigLoader {
    /// Create a new config loader and load from default locations and the environment
    pub fn new() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut loader = Self::with_defaults()?;
        loader.load_from_default_paths()?;
        loader.apply_overrides(|name| std::env::var(name).ok());

        // Validate early so a broken file is reported here, not on first use
        loader.config()?;
        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self::with_defaults()?;
        loader.load_from_file(path)?;
        loader.config()?;
        Ok(loader)
    }

    /// Start from the built-in defaults
    fn with_defaults() -> Result<Self> {
        let merged = serde_json::to_value(ClientConfig::default()).map_err(|e| {
            MfpError::Config(format!("Failed to serialize built-in defaults: {}", e))
        })?;
        Ok(Self { merged })
    }

    /// Load configuration from default paths
    fn load_from_default_paths(&mut self) -> Result<()> {
        for path in Self::get_config_paths() {
            if path.exists() {
                self.load_from_file(&path)?;
            }
        }
        Ok(())
    }

    /// Get list of config paths to check, lowest priority first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".mfp-client").join("client.json"));
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("mfp-client").join("client.json"));
        }

        paths.push(PathBuf::from("mfp-client.json"));

        if let Ok(custom_path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(custom_path));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MfpError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let overlay: Value = serde_json::from_str(&content).map_err(|e| {
            MfpError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), "loaded client config file");
        merge_json(&mut self.merged, overlay);
        Ok(())
    }

    /// Apply environment overrides through a lookup function
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let Some(obj) = self.merged.as_object_mut() else {
            return;
        };

        if let Some(url) = lookup("MFP_SERVER_URL") {
            obj.insert("server_url".to_string(), Value::String(url));
        }
        if let Some(path) = lookup("MFP_PINNED_CERTIFICATE") {
            obj.insert("pinned_certificate".to_string(), Value::String(path));
        }

        let numeric = [
            ("MFP_HEARTBEAT_INTERVAL", "heartbeat_interval_secs"),
            ("MFP_REQUEST_TIMEOUT_MS", "default_timeout_ms"),
        ];
        for (env, key) in numeric {
            match lookup(env).map(|raw| raw.trim().parse::<i64>()) {
                Some(Ok(n)) => {
                    obj.insert(key.to_string(), Value::from(n));
                }
                Some(Err(e)) => {
                    tracing::warn!(variable = env, error = %e, "ignoring non-numeric override");
                }
                None => {}
            }
        }
    }

    /// Get the loaded configuration
    pub fn config(&self) -> Result<ClientConfig> {
        serde_json::from_value(self.merged.clone())
            .map_err(|e| MfpError::Config(format!("Invalid client configuration: {}", e)))
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> Result<ClientConfig> {
        serde_json::from_value(self.merged)
            .map_err(|e| MfpError::Config(format!("Invalid client configuration: {}", e)))
    }
}

/// Merge `overlay` into `base`; objects merge key by key, anything else replaces
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_only() {
        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config().unwrap(), ClientConfig::default());
    }

    #[test]
    fn test_load_from_custom_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "server_url": "http://10.0.0.8:9080/mfp",
                "global_headers": {{ "X-Tenant": "acme" }},
                "paths": {{ "heartbeat": "api/ping" }}
            }}"#
        )
        .unwrap();

        let config = ConfigLoader::from_path(file.path())
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(
            config.server_url.unwrap().as_str(),
            "http://10.0.0.8:9080/mfp"
        );
        assert_eq!(config.paths.heartbeat, "api/ping");
        // untouched nested keys keep their defaults
        assert_eq!(config.paths.adapters, "api/adapters");
        assert_eq!(config.global_headers.len(), 1);
    }

    #[test]
    fn test_later_files_override_earlier() {
        let mut loader = ConfigLoader::with_defaults().unwrap();
        merge_json(
            &mut loader.merged,
            serde_json::json!({ "heartbeat_interval_secs": 30, "connect_retries": 5 }),
        );
        merge_json(
            &mut loader.merged,
            serde_json::json!({ "heartbeat_interval_secs": 90 }),
        );

        let config = loader.config().unwrap();
        assert_eq!(config.heartbeat_interval_secs, 90);
        assert_eq!(config.connect_retries, 5);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MFP_SERVER_URL", "https://override.example.com/ctx"),
            ("MFP_HEARTBEAT_INTERVAL", "-1"),
            ("MFP_REQUEST_TIMEOUT_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut loader = ConfigLoader::with_defaults().unwrap();
        loader.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        let config = loader.config().unwrap();
        assert_eq!(
            config.server_url.unwrap().as_str(),
            "https://override.example.com/ctx"
        );
        assert_eq!(config.heartbeat_interval_secs, -1);
        assert_eq!(config.default_timeout_ms, 10_000);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{ not json").unwrap();

        let err = ConfigLoader::from_path(file.path()).err().unwrap();
        assert!(matches!(err, MfpError::Config(_)));
    }
}
