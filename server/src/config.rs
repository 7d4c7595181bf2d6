//! Configuration management for the server.

use std::env;
use std::time::Duration;

use tablesync_engine::reconcile::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_CLOCK_SKEW_MS};
use tablesync_engine::SyncOptions;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL. Without one, rows are kept in memory.
    pub database_url: Option<String>,
    /// Upper bound on pooled database connections
    pub database_max_connections: u32,
    /// Per-request deadline
    pub request_timeout: Duration,
    /// Largest accepted mutation batch or replacement row set
    pub max_batch_size: usize,
    /// How far a claimed edit time may run ahead of the server clock
    pub max_clock_skew_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            database_max_connections: 10,
            request_timeout: Duration::from_millis(30_000),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_clock_skew_ms: Some(DEFAULT_MAX_CLOCK_SKEW_MS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or(defaults.host);

        let port = match lookup("PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidPort)?,
            None => defaults.port,
        };

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let database_max_connections = parse_number(
            &lookup,
            "DATABASE_MAX_CONNECTIONS",
            defaults.database_max_connections,
        )?;
        if database_max_connections == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        let request_timeout = Duration::from_millis(parse_number(
            &lookup,
            "REQUEST_TIMEOUT_MS",
            defaults.request_timeout.as_millis() as u64,
        )?);

        let max_batch_size = parse_number(&lookup, "MAX_BATCH_SIZE", defaults.max_batch_size)?;

        // 0 turns the skew check off
        let max_clock_skew_ms = match parse_number(
            &lookup,
            "MAX_CLOCK_SKEW_MS",
            DEFAULT_MAX_CLOCK_SKEW_MS,
        )? {
            0 => None,
            skew => Some(skew),
        };

        Ok(Self {
            host,
            port,
            database_url,
            database_max_connections,
            request_timeout,
            max_batch_size,
            max_clock_skew_ms,
        })
    }

    /// Request limits handed to the sync backends.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_batch_size: self.max_batch_size,
            max_clock_skew_ms: self.max_clock_skew_ms,
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => match value.trim().parse() {
            Ok(number) => Ok(number),
            Err(_) => Err(ConfigError::InvalidNumber { key, value }),
        },
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid value for {key}: {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}
