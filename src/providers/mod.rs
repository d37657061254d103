//! Provider Gateway - quote source implementations (Binance, CoinGecko, scripted)
//!
//! Each upstream source sits behind [`QuoteProvider`] so the orchestrator can
//! swap implementations and tests can script them. Every implementation
//! declares its own rate-limit metadata for an external limiter; this crate
//! does not throttle.

mod binance;
mod coingecko;
mod scripted;

pub use binance::BinanceProvider;
pub use coingecko::CoinGeckoProvider;
pub use scripted::ScriptedProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use crate::types::Symbol;

/// Structured provider failures.
///
/// Every kind is per-symbol, transient, and non-fatal to the polling job:
/// the orchestrator logs it, bumps the job's error count, and moves on.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Declared rate limit of a provider: `calls` requests per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub calls: u32,
    pub period: Duration,
}

/// One fetched quote, before persistence
#[derive(Debug, Clone)]
pub struct Quote {
    pub symbol: Symbol,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub provider_name: &'static str,
    /// Verbatim upstream response body, persisted alongside the fact
    pub raw_payload: String,
}

/// Trait for quote providers
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Fetch the current quote for a symbol
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError>;

    /// Whether this provider can serve the given raw symbol
    fn validate_symbol(&self, symbol: &str) -> bool;

    /// Declared upstream rate limit, consumed by an external limiter
    fn rate_limit(&self) -> RateLimit;
}
