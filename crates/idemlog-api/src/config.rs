//! Server configuration read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use idemlog_pipeline::{ConsumerConfig, DEFAULT_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY};
use idemlog_store::StoreOptions;

use crate::error::AppError;

/// File name of the dedup database inside `data_dir`.
pub const DB_FILE_NAME: &str = "dedup_store.db";

/// Runtime configuration for the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Directory holding the dedup database.
    pub data_dir: PathBuf,
    /// Intake queue capacity.
    pub queue_max_size: usize,
    /// Events per consumer batch.
    pub consumer_batch_size: usize,
    /// Consumer idle sleep.
    pub consumer_poll_interval: Duration,
    /// Pooled store connections.
    pub store_max_connections: u32,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            queue_max_size: DEFAULT_QUEUE_CAPACITY,
            consumer_batch_size: 100,
            consumer_poll_interval: Duration::from_millis(10),
            store_max_connections: StoreOptions::default().max_connections,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, falling back to defaults for
    /// unset variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let config = Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT", defaults.port)?,
            data_dir: lookup("DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            queue_max_size: parse_var(&lookup, "QUEUE_MAX_SIZE", defaults.queue_max_size)?,
            consumer_batch_size: parse_var(
                &lookup,
                "CONSUMER_BATCH_SIZE",
                defaults.consumer_batch_size,
            )?,
            consumer_poll_interval: Duration::from_millis(parse_var(
                &lookup,
                "CONSUMER_POLL_INTERVAL_MS",
                10,
            )?),
            store_max_connections: parse_var(
                &lookup,
                "STORE_MAX_CONNECTIONS",
                defaults.store_max_connections,
            )?,
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        };

        if config.queue_max_size == 0 {
            return Err(AppError::Config("QUEUE_MAX_SIZE must be at least 1".into()));
        }
        if config.queue_max_size > MAX_QUEUE_CAPACITY {
            return Err(AppError::Config(format!(
                "QUEUE_MAX_SIZE must be at most {MAX_QUEUE_CAPACITY}"
            )));
        }
        if config.consumer_batch_size == 0 {
            return Err(AppError::Config(
                "CONSUMER_BATCH_SIZE must be at least 1".into(),
            ));
        }
        Ok(config)
    }

    /// Path of the dedup database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    /// Consumer settings derived from this configuration.
    #[must_use]
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            batch_size: self.consumer_batch_size,
            poll_interval: self.consumer_poll_interval,
            ..ConsumerConfig::default()
        }
    }

    /// Store settings derived from this configuration.
    #[must_use]
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_connections: self.store_max_connections,
            ..StoreOptions::default()
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} must be a valid number: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.port, 8080);
        assert_eq!(config.queue_max_size, 10_000);
        assert_eq!(config.db_path(), PathBuf::from("./data/dedup_store.db"));
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9090"),
            ("DATA_DIR", "/var/lib/idemlog"),
            ("QUEUE_MAX_SIZE", "50"),
            ("CONSUMER_BATCH_SIZE", "25"),
            ("CONSUMER_POLL_INTERVAL_MS", "250"),
            ("STORE_MAX_CONNECTIONS", "2"),
        ]))
        .unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/idemlog/dedup_store.db"));
        assert_eq!(config.queue_max_size, 50);
        assert_eq!(config.consumer_config().batch_size, 25);
        assert_eq!(
            config.consumer_config().poll_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.store_options().max_connections, 2);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = Config::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("PORT")));
    }

    #[test]
    fn test_zero_queue_size_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("QUEUE_MAX_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_oversized_queue_size_is_rejected() {
        let huge = (MAX_QUEUE_CAPACITY + 1).to_string();
        let err = Config::from_lookup(lookup_from(&[("QUEUE_MAX_SIZE", huge.as_str())]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("QUEUE_MAX_SIZE")));
    }
}
