//! Configuration for the data store server and the sync client.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_psk = lookup("GABINETE_API_PSK").filter(|k| !k.is_empty());

        let db_path = lookup("GABINETE_DB_PATH")
            .unwrap_or_else(|| "./data/gabinete.sqlite".to_string())
            .into();

        let index_path = lookup("GABINETE_INDEX_PATH")
            .unwrap_or_else(|| "./data/index".to_string())
            .into();

        let bind_addr = parse_var(&lookup, "GABINETE_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = lookup("GABINETE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            api_psk,
            db_path,
            index_path,
            bind_addr,
            log_level,
        })
    }
}

/// Sync client configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote data store
    pub remote_url: String,
    /// Sent as `x-api-key` when set
    pub api_key: Option<String>,
    /// SQLite file backing the offline cache and write queue
    pub cache_path: PathBuf,
    /// Upper bound for every remote request
    pub remote_timeout: Duration,
    /// Health probe period; zero disables probing
    pub probe_interval: Duration,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let remote_url =
            lookup("GABINETE_REMOTE_URL").unwrap_or_else(|| "http://127.0.0.1:8080".to_string());
        let api_key = lookup("GABINETE_API_PSK").filter(|k| !k.is_empty());
        let cache_path = lookup("GABINETE_CACHE_PATH")
            .unwrap_or_else(|| "./data/offline-cache.sqlite".to_string())
            .into();
        let timeout_secs: u64 = parse_var(&lookup, "GABINETE_REMOTE_TIMEOUT_SECS", "15")?;
        let probe_secs: u64 = parse_var(&lookup, "GABINETE_PROBE_INTERVAL_SECS", "10")?;

        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                var: "GABINETE_REMOTE_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            remote_url,
            api_key,
            cache_path,
            remote_timeout: Duration::from_secs(timeout_secs),
            probe_interval: Duration::from_secs(probe_secs),
        })
    }

    /// `None` when probing is disabled.
    pub fn probe(&self) -> Option<Duration> {
        (!self.probe_interval.is_zero()).then_some(self.probe_interval)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(var).unwrap_or_else(|| default.to_string());
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert!(config.api_psk.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/gabinete.sqlite"));
        assert_eq!(config.index_path, PathBuf::from("./data/index"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_bind_addr_is_reported() {
        let err = Config::from_lookup(lookup(&[("GABINETE_BIND_ADDR", "not-an-addr")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "GABINETE_BIND_ADDR",
                value: "not-an-addr".to_string()
            }
        );
    }

    #[test]
    fn test_sync_config_defaults_and_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.remote_url, "http://127.0.0.1:8080");
        assert_eq!(config.remote_timeout, Duration::from_secs(15));
        assert_eq!(config.probe(), Some(Duration::from_secs(10)));

        let config = SyncConfig::from_lookup(lookup(&[
            ("GABINETE_REMOTE_URL", "https://gabinete.example.org"),
            ("GABINETE_API_PSK", "secret"),
            ("GABINETE_PROBE_INTERVAL_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.probe(), None);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(SyncConfig::from_lookup(lookup(&[("GABINETE_REMOTE_TIMEOUT_SECS", "0")])).is_err());
    }
}
