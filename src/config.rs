//! Configuration module
//!
//! Loads configuration from environment variables.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Per-account money movement limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransactionLimits {
    /// Maximum total of withdrawal-type movements per account per UTC day
    pub daily_withdrawal_limit: Decimal,

    /// Maximum amount of a single operation
    pub max_transaction_amount: Decimal,
}

impl Default for TransactionLimits {
    fn default() -> Self {
        Self {
            daily_withdrawal_limit: Decimal::new(5_000_000, 0),
            max_transaction_amount: Decimal::new(1_000_000_000, 2),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub log_format: LogFormat,

    pub limits: TransactionLimits,

    /// Account read cache TTL; 0 disables the cache
    pub cache_ttl_seconds: u64,

    /// External payment gateway; the simulator is used when unset
    pub payment_gateway_url: Option<String>,

    pub payment_gateway_timeout_ms: u64,

    /// Outbox relay poll interval
    pub stream_poll_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = env_or("DATABASE_MAX_CONNECTIONS", 10)?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env_or("PORT", 3000)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let log_format = match env::var("LOG_FORMAT") {
            Ok(value) => parse_log_format(&value)?,
            Err(_) => LogFormat::Pretty,
        };

        let defaults = TransactionLimits::default();
        let limits = TransactionLimits {
            daily_withdrawal_limit: env_or("DAILY_WITHDRAWAL_LIMIT", defaults.daily_withdrawal_limit)?,
            max_transaction_amount: env_or("MAX_TRANSACTION_AMOUNT", defaults.max_transaction_amount)?,
        };
        if limits.daily_withdrawal_limit <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue("DAILY_WITHDRAWAL_LIMIT"));
        }
        if limits.max_transaction_amount <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue("MAX_TRANSACTION_AMOUNT"));
        }

        let cache_ttl_seconds = env_or("CACHE_TTL_SECONDS", 30)?;

        let payment_gateway_url = env::var("PAYMENT_GATEWAY_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let payment_gateway_timeout_ms = env_or("PAYMENT_GATEWAY_TIMEOUT_MS", 5000)?;

        let stream_poll_interval_ms = env_or("STREAM_POLL_INTERVAL_MS", 1000)?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            log_format,
            limits,
            cache_ttl_seconds,
            payment_gateway_url,
            payment_gateway_timeout_ms,
            stream_poll_interval_ms,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn payment_gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.payment_gateway_timeout_ms)
    }

    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_interval_ms.max(10))
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name))
}

fn parse_log_format(value: &str) -> Result<LogFormat, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "json" => Ok(LogFormat::Json),
        "" | "pretty" | "text" => Ok(LogFormat::Pretty),
        _ => Err(ConfigError::InvalidValue("LOG_FORMAT")),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
