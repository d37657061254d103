//! Binance REST client for spot ticker prices
//!
//! Fetches the last traded price for `<SYMBOL>USDT` pairs via the public
//! ticker endpoint.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::providers::{ProviderError, Quote, QuoteProvider, RateLimit};
use crate::types::Symbol;

const BINANCE_REST_URL: &str = "https://api.binance.com";

// Public REST weight limit is 1200/min per IP
const BINANCE_RATE_LIMIT: RateLimit = RateLimit {
    calls: 1200,
    period: Duration::from_secs(60),
};

#[derive(Debug, Clone, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

#[derive(Debug, Clone)]
pub struct BinanceProvider {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceProvider {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(BINANCE_REST_URL, timeout)
    }

    /// Point the client at a different host (test servers)
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn pair(symbol: &Symbol) -> String {
        format!("{}USDT", symbol.as_str())
    }
}

#[async_trait]
impl QuoteProvider for BinanceProvider {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url,
            Self::pair(symbol)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        // Binance answers unknown symbols with 400 and code -1121
        if status.as_u16() == 400 || status.as_u16() == 404 {
            return Err(ProviderError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::UpstreamUnavailable(format!(
                "Binance API returned {status}"
            )));
        }

        let raw_payload = response
            .text()
            .await
            .map_err(|e| ProviderError::UpstreamUnavailable(e.to_string()))?;

        let ticker: TickerPrice = serde_json::from_str(&raw_payload)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let price = Decimal::from_str(&ticker.price)
            .map_err(|e| ProviderError::MalformedResponse(format!("price field: {e}")))?;

        Ok(Quote {
            symbol: symbol.clone(),
            price,
            timestamp: Utc::now(),
            provider_name: self.name(),
            raw_payload,
        })
    }

    fn validate_symbol(&self, symbol: &str) -> bool {
        let s = symbol.trim();
        !s.is_empty() && s.len() <= 12 && s.chars().all(|c| c.is_ascii_alphanumeric())
    }

    fn rate_limit(&self) -> RateLimit {
        BINANCE_RATE_LIMIT
    }
}
