//! Configuration management for the inventory ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with LEDGER_ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main ledger configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Stock operation engine configuration
    pub stock: StockConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StockConfig {
    /// Reorder point applied to lazily created inventory levels
    pub default_reorder_point: i64,

    /// Reorder quantity applied to lazily created inventory levels
    pub default_reorder_quantity: i64,

    /// Seconds to wait for row locks before aborting an operation
    pub lock_timeout_secs: u64,

    /// Seconds a single operation may execute before aborting
    pub statement_timeout_secs: u64,

    /// Attempts made by the bounded-retry helper
    pub retry_max_attempts: u32,

    /// Base backoff between retry attempts, in milliseconds
    pub retry_base_backoff_ms: u64,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("stock.default_reorder_point", 10)?
            .set_default("stock.default_reorder_quantity", 50)?
            .set_default("stock.lock_timeout_secs", 10)?
            .set_default("stock.statement_timeout_secs", 20)?
            .set_default("stock.retry_max_attempts", 3)?
            .set_default("stock.retry_base_backoff_ms", 50)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LEDGER_ prefix)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            default_reorder_point: 10,
            default_reorder_quantity: 50,
            lock_timeout_secs: 10,
            statement_timeout_secs: 20,
            retry_max_attempts: 3,
            retry_base_backoff_ms: 50,
        }
    }
}
