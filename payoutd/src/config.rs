//! Service Configuration
//!
//! Loaded from a TOML file when one is given; every field has a sensible
//! default so the service also runs bare for local work.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the payout service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bind address for the HTTP listener
    pub bind_addr: String,
    /// HTTP port
    pub port: u16,
    /// Path to the SQLite database file
    pub database_path: String,
    /// Shared secret accepted in `x-scheduler-token` on cron routes.
    /// The `x-scheduler-cron` marker header is always accepted.
    pub scheduler_token: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
            database_path: "payoutd.db".to_string(),
            scheduler_token: None,
            request_timeout_secs: 30,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ServiceConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_addr, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.bind_addr, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = ServiceConfig::default();
        assert!(config.socket_addr().is_ok());
        assert!(config.scheduler_token.is_none());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: ServiceConfig =
            toml::from_str("port = 9090\nscheduler_token = \"hunter2\"").unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.scheduler_token.as_deref(), Some("hunter2"));
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.request_timeout_secs, 30);
    }
}
