//! Application configuration loaded from environment variables.

use std::time::Duration;

use aidtrail_protocol::LedgerConfig;

use crate::errors::{ApiError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Upper bound (in seconds) between ledger flushes to SQLite
    pub flush_interval_secs: u64,
    /// How long a command waits for the ledger writer lock
    pub lock_timeout_ms: u64,
    /// Retries an allocation makes after a lock timeout
    pub max_conflict_retries: u32,
    /// Verify the persisted chain before serving
    pub verify_on_startup: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./aidtrail_ledger.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid API_PORT".to_string()))?,
            flush_interval_secs: env_var("FLUSH_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid FLUSH_INTERVAL_SECS".to_string()))?,
            lock_timeout_ms: env_var("LOCK_TIMEOUT_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid LOCK_TIMEOUT_MS".to_string()))?,
            max_conflict_retries: env_var("MAX_CONFLICT_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid MAX_CONFLICT_RETRIES".to_string()))?,
            verify_on_startup: parse_bool(
                "VERIFY_ON_STARTUP",
                &env_var("VERIFY_ON_STARTUP").unwrap_or_else(|_| "true".to_string()),
            )?,
        })
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            max_conflict_retries: self.max_conflict_retries,
            verify_on_restore: self.verify_on_startup,
            ..LedgerConfig::default()
        }
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ApiError::Config(format!("Missing env var: {key}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ApiError::Config(format!("Invalid {key}"))),
    }
}
