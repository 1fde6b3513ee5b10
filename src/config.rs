//! Pool and connection configuration
//!
//! Plain serde-backed configuration structures with JSON persistence. Limit
//! fields use milliseconds with zero meaning "no limit", matching how the
//! host's own prestart job pools express unlimited values.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Policy limits for one connection pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolLimits {
    /// Maximum number of pooled connections; 0 means unlimited
    pub max_connections: usize,
    /// Maximum time a connection may sit idle before eviction, in ms
    pub max_idle_ms: u64,
    /// Maximum total lifetime of a connection, in ms
    pub max_lifetime_ms: u64,
    /// Maximum number of times a connection may be handed out
    pub max_use_count: u64,
    /// Maximum time a connection may be held in use, in ms
    pub max_use_time_ms: u64,
    /// Probe liveness before handing out a pooled connection
    pub pretest_connections: bool,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_connections: 64,
            max_idle_ms: 3_600_000,      // 1 hour
            max_lifetime_ms: 86_400_000, // 24 hours
            max_use_count: 0,
            max_use_time_ms: 0,
            pretest_connections: false,
        }
    }
}

/// Socket-level options for host server connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Socket read timeout in seconds; 0 means blocking reads
    pub read_timeout_secs: u64,
    /// Socket write timeout in seconds; 0 means blocking writes
    pub write_timeout_secs: u64,
    /// Use TLS sockets and the secure service ports
    pub use_tls: bool,
    /// Path to a PEM or DER bundle of trusted CA certificates
    pub tls_ca_bundle_path: Option<String>,
    /// Override the well-known service port (single-service test hosts)
    pub port_override: Option<u16>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            use_tls: false,
            tls_ca_bundle_path: None,
            port_override: None,
        }
    }
}

/// Complete on-disk configuration for a pool
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    pub limits: PoolLimits,
    pub connect: ConnectOptions,
}

impl PoolConfig {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hostlink400")
            .join("pool.json")
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let config: PoolConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                error: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::FileError {
                path: parent.display().to_string(),
                error: e.to_string(),
            })?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        fs::write(path, text).map_err(|e| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Reject configurations no pool could operate under
    pub fn validate(&self) -> ConfigResult<()> {
        if self.connect.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "connect_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "connect timeout must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults() {
        let limits = PoolLimits::default();
        assert_eq!(limits.max_connections, 64);
        assert_eq!(limits.max_idle_ms, 3_600_000, "default idle limit should be 1 hour");
        assert_eq!(limits.max_use_count, 0, "use count should default to unlimited");
        assert!(!limits.pretest_connections);
    }

    #[test]
    fn test_config_json_round_trip() {
        let mut config = PoolConfig::default();
        config.limits.max_connections = 8;
        config.connect.use_tls = true;

        let text = serde_json::to_string(&config).unwrap();
        let back: PoolConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let mut config = PoolConfig::default();
        config.connect.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
