//! Configuration management for pricewatch
//!
//! Loads defaults, then optional `config/default` + `config/local` files,
//! then `PRICEWATCH__*` environment overrides via .env.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub polling: PollingConfig,
    pub providers: ProvidersConfig,
    pub broker: BrokerConfig,
    pub averaging: AveragingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Smallest accepted job interval in seconds
    pub min_interval_secs: u64,
    /// Largest accepted job interval in seconds
    pub max_interval_secs: u64,
    /// Symbol cap per job
    pub max_symbols_per_job: usize,
    /// Provider used for the bootstrap job
    pub default_provider: String,
    /// When non-empty, one job is created at startup for these symbols
    pub bootstrap_symbols: Vec<String>,
    /// Interval for the bootstrap job in seconds
    pub bootstrap_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Per-request HTTP timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Binance base URL (overridable for test servers)
    pub binance_url: Option<String>,
    /// CoinGecko base URL (overridable for test servers)
    pub coingecko_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Target stream name, provisioned lazily
    pub stream: String,
    /// Logical consumer group for the aggregator
    pub consumer_group: String,
    /// Max messages per consumer batch
    pub batch_size: usize,
    /// Idle delay between consumer polls in milliseconds
    pub poll_interval_ms: u64,
    /// Produce attempts per fact
    pub publish_attempts: u32,
    /// Delay between produce attempts in milliseconds
    pub publish_backoff_ms: u64,
    /// Base consumer backoff after transport failures in milliseconds
    pub consumer_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AveragingConfig {
    /// Moving-average window size
    pub period: usize,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Polling defaults
            .set_default("polling.min_interval_secs", 5)?
            .set_default("polling.max_interval_secs", 3600)?
            .set_default("polling.max_symbols_per_job", 25)?
            .set_default("polling.default_provider", "scripted")?
            .set_default("polling.bootstrap_symbols", Vec::<String>::new())?
            .set_default("polling.bootstrap_interval_secs", 60)?
            // Provider defaults
            .set_default("providers.request_timeout_ms", 10_000)?
            // Broker defaults
            .set_default("broker.stream", "price-facts")?
            .set_default("broker.consumer_group", "moving-averages")?
            .set_default("broker.batch_size", 64)?
            .set_default("broker.poll_interval_ms", 500)?
            .set_default("broker.publish_attempts", 3)?
            .set_default("broker.publish_backoff_ms", 200)?
            .set_default("broker.consumer_backoff_ms", 1000)?
            // Averaging defaults
            .set_default("averaging.period", 5)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICEWATCH_*)
            .add_source(Environment::with_prefix("PRICEWATCH").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a one-line digest of the config for startup logging
    pub fn digest(&self) -> String {
        format!(
            "interval_bounds=[{},{}]s max_symbols={} provider={} period={} stream={}",
            self.polling.min_interval_secs,
            self.polling.max_interval_secs,
            self.polling.max_symbols_per_job,
            self.polling.default_provider,
            self.averaging.period,
            self.broker.stream
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
