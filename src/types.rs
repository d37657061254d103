//! Core types used throughout pricewatch
//!
//! Defines jobs, price facts, and moving-average records shared by the
//! orchestrator, the event pipeline, and the stores.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Normalized uppercase ticker identifier.
///
/// Construction goes through [`Symbol::parse`], so a `Symbol` in hand is
/// always trimmed, uppercased, and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize a raw ticker string. Returns `None` for empty input or
    /// input containing anything besides ASCII alphanumerics, `.` and `-`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() || normalized.len() > 16 {
            return None;
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return None;
        }
        Some(Symbol(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upstream quote provider identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Binance,
    CoinGecko,
    /// Deterministic offline provider (dry-run wiring and tests)
    Scripted,
}

impl ProviderKind {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Some(ProviderKind::Binance),
            "coingecko" => Some(ProviderKind::CoinGecko),
            "scripted" => Some(ProviderKind::Scripted),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Binance => write!(f, "binance"),
            ProviderKind::CoinGecko => write!(f, "coingecko"),
            ProviderKind::Scripted => write!(f, "scripted"),
        }
    }
}

/// Lifecycle state of a polling job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Persisted, task spawned, first cycle not yet started
    Accepted,
    /// Task loop running
    Active,
    /// Fatal error escaped the task loop; needs external restore
    Failed,
    /// Explicitly stopped via `stop_job`
    Stopped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Accepted => write!(f, "accepted"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Persisted polling-job record.
///
/// Mutated only by the orchestrator (status, last_run_at, error bookkeeping)
/// and by an explicit stop. Never physically deleted; terminal states are soft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Ordered, deduplicated, normalized symbol set (never empty)
    pub symbols: Vec<Symbol>,
    /// Polling interval in seconds, within configured bounds
    pub interval_secs: u64,
    pub provider: ProviderKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_count: u64,
}

/// One observed price, persisted once per successful fetch. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFact {
    pub id: Uuid,
    pub symbol: Symbol,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    /// 1:1 reference to the persisted raw provider payload
    pub raw_ref: Uuid,
}

/// Trailing moving average, upserted by the aggregator.
///
/// Natural key is `(symbol, period, timestamp)`; never created with fewer
/// than `period` samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageRecord {
    pub symbol: Symbol,
    pub period: usize,
    pub value: Decimal,
    pub sample_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Persisted job fields merged with the in-memory liveness flag
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub symbols: Vec<Symbol>,
    pub interval_secs: u64,
    pub provider: ProviderKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_count: u64,
    /// Whether a task handle is currently present in the supervisor table
    pub is_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_normalizes_case_and_whitespace() {
        let sym = Symbol::parse("  aapl ").unwrap();
        assert_eq!(sym.as_str(), "AAPL");
    }

    #[test]
    fn test_symbol_rejects_empty_and_garbage() {
        assert!(Symbol::parse("").is_none());
        assert!(Symbol::parse("   ").is_none());
        assert!(Symbol::parse("BTC USD").is_none());
        assert!(Symbol::parse("WAY_TOO_LONG_SYMBOL_NAME").is_none());
    }

    #[test]
    fn test_symbol_allows_dotted_tickers() {
        assert_eq!(Symbol::parse("brk.b").unwrap().as_str(), "BRK.B");
    }

    #[test]
    fn test_provider_kind_roundtrip() {
        assert_eq!(
            ProviderKind::from_str("Binance"),
            Some(ProviderKind::Binance)
        );
        assert_eq!(ProviderKind::from_str("nope"), None);
        assert_eq!(ProviderKind::CoinGecko.to_string(), "coingecko");
    }
}
