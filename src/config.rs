use crate::domain::TradingConfig;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub price_feed: PriceFeedConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Periodic snapshot push to every connected user; 0 disables
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

fn default_snapshot_interval() -> u64 {
    10
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            snapshot_interval_secs: default_snapshot_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Keep the ledger in process memory instead of PostgreSQL
    #[serde(default)]
    pub in_memory: bool,
}

fn default_database_url() -> String {
    "postgres://localhost/simtrade".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            in_memory: false,
        }
    }
}

/// Pending order sweeper
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriceSourceKind {
    /// Fixed table of demo prices
    #[default]
    Static,
    /// Yahoo Finance chart endpoint
    Yahoo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceFeedConfig {
    #[serde(default)]
    pub source: PriceSourceKind,
    /// Upper bound on a single price lookup
    #[serde(default = "default_price_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Symbol -> price, used by the static source (falls back to built-in demo prices)
    #[serde(default)]
    pub static_prices: HashMap<String, Decimal>,
}

fn default_price_timeout() -> u64 {
    3000
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            source: PriceSourceKind::Static,
            timeout_ms: default_price_timeout(),
            base_url: None,
            static_prices: HashMap::new(),
        }
    }
}

/// Upper bound accepted for `store.retry_attempts`
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Upper bound accepted for `store.retry_backoff_ms`
pub const MAX_RETRY_BACKOFF_MS: u64 = 10_000;

/// Retry policy for transient persistence failures
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    50
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rotating log files
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            trading: TradingConfig::default(),
            sweeper: SweeperConfig::default(),
            price_feed: PriceFeedConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("sweeper.interval_secs", 5)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SIMTRADE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SIMTRADE__DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("SIMTRADE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let trading = &self.trading;

        if trading.market.trim().is_empty() {
            errors.push("trading.market must not be empty".to_string());
        }

        if trading.commission_rate < Decimal::ZERO || trading.commission_rate >= Decimal::ONE {
            errors.push("trading.commission_rate must be in [0, 1)".to_string());
        }

        if trading.min_commission < Decimal::ZERO {
            errors.push("trading.min_commission must not be negative".to_string());
        }

        if trading.lot_size < 1 {
            errors.push("trading.lot_size must be >= 1".to_string());
        }

        if trading.min_order_quantity < 1 {
            errors.push("trading.min_order_quantity must be >= 1".to_string());
        }

        if trading.default_initial_capital <= Decimal::ZERO {
            errors.push("trading.default_initial_capital must be positive".to_string());
        }

        if self.sweeper.interval_secs == 0 {
            errors.push("sweeper.interval_secs must be >= 1".to_string());
        }

        if self.price_feed.timeout_ms == 0 {
            errors.push("price_feed.timeout_ms must be >= 1".to_string());
        }

        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.store.retry_attempts) {
            errors.push(format!(
                "store.retry_attempts must be in [1, {MAX_RETRY_ATTEMPTS}]"
            ));
        }

        if self.store.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            errors.push(format!(
                "store.retry_backoff_ms must be <= {MAX_RETRY_BACKOFF_MS}"
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
