//! Ledger configuration, read from environment variables.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `DATABASE_URL` | unset | Postgres URL; unset selects the in-memory store |
//! | `STOCK_DB_MAX_CONNECTIONS` | `10` | Pool size |
//! | `STOCK_OPERATION_TIMEOUT_SECS` | `45` | Deadline for one ledger operation |
//! | `STOCK_WAREHOUSE_LOCATION` | `WAREHOUSE` | Location recorded on newly opened positions |

use std::time::Duration;

use thiserror::Error;

use fibreflow_stock::WAREHOUSE;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub operation_timeout: Duration,
    pub warehouse_location: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            warehouse_location: WAREHOUSE.to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let max_connections = match get("STOCK_DB_MAX_CONNECTIONS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "STOCK_DB_MAX_CONNECTIONS",
                        expected: "a positive integer",
                        value: raw,
                    });
                }
            },
            None => defaults.max_connections,
        };

        let operation_timeout = match get("STOCK_OPERATION_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "STOCK_OPERATION_TIMEOUT_SECS",
                        expected: "a positive number of seconds",
                        value: raw,
                    });
                }
            },
            None => defaults.operation_timeout,
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            max_connections,
            operation_timeout,
            warehouse_location: get("STOCK_WAREHOUSE_LOCATION").unwrap_or(defaults.warehouse_location),
        })
    }
}
