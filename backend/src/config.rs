//! Configuration management for the Stockroom server
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with STOCKROOM__ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Daily aggregation job
    pub aggregation: AggregationConfig,

    /// Reconciliation report settings
    pub reconciliation: ReconciliationConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
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
pub struct AggregationConfig {
    /// Run the background daily aggregator
    pub enabled: bool,

    /// Seconds between aggregation runs
    pub interval_secs: u64,

    /// Days re-aggregated on every run, to pick up back-dated movements
    pub lookback_days: u32,

    /// Most days a single run or manual request may cover
    pub max_days: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    /// Read daily aggregates where available instead of scanning the ledger
    pub use_daily_aggregates: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("STOCKROOM_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("aggregation.enabled", true)?
            .set_default("aggregation.interval_secs", 900)?
            .set_default("aggregation.lookback_days", 7)?
            .set_default("aggregation.max_days", 366)?
            .set_default("reconciliation.use_daily_aggregates", true)?
            .set_default("logging.json", false)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (STOCKROOM__ prefix)
            .add_source(
                Environment::with_prefix("STOCKROOM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Whether reconciliation may read daily aggregates. Without a running
    /// aggregator the rows would go stale, so the ledger is used instead.
    pub fn reconcile_from_aggregates(&self) -> bool {
        self.aggregation.enabled && self.reconciliation.use_daily_aggregates
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}
