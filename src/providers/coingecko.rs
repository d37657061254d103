//! CoinGecko REST client for simple USD spot prices
//!
//! CoinGecko keys its API by coin id rather than ticker, so a small lookup
//! table maps the symbols we support onto ids.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

use crate::providers::{ProviderError, Quote, QuoteProvider, RateLimit};
use crate::types::Symbol;

const COINGECKO_REST_URL: &str = "https://api.coingecko.com";

// Free-tier public API allowance
const COINGECKO_RATE_LIMIT: RateLimit = RateLimit {
    calls: 30,
    period: Duration::from_secs(60),
};

fn coin_id(symbol: &str) -> Option<&'static str> {
    match symbol {
        "BTC" => Some("bitcoin"),
        "ETH" => Some("ethereum"),
        "SOL" => Some("solana"),
        "XRP" => Some("ripple"),
        "ADA" => Some("cardano"),
        "DOGE" => Some("dogecoin"),
        "DOT" => Some("polkadot"),
        "LINK" => Some("chainlink"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct CoinGeckoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoProvider {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(COINGECKO_REST_URL, timeout)
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
}

#[async_trait]
impl QuoteProvider for CoinGeckoProvider {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        let id = coin_id(symbol.as_str()).ok_or_else(|| ProviderError::SymbolNotFound {
            symbol: symbol.to_string(),
        })?;

        let url = format!(
            "{}/api/v3/simple/price?ids={}&vs_currencies=usd&precision=full",
            self.base_url, id
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
        if !status.is_success() {
            return Err(ProviderError::UpstreamUnavailable(format!(
                "CoinGecko API returned {status}"
            )));
        }

        let raw_payload = response
            .text()
            .await
            .map_err(|e| ProviderError::UpstreamUnavailable(e.to_string()))?;

        // {"bitcoin":{"usd":64123.45}}
        let body: HashMap<String, HashMap<String, Decimal>> = serde_json::from_str(&raw_payload)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let price = body
            .get(id)
            .and_then(|quote| quote.get("usd"))
            .copied()
            .ok_or_else(|| {
                ProviderError::MalformedResponse(format!("missing usd quote for {id}"))
            })?;

        Ok(Quote {
            symbol: symbol.clone(),
            price,
            timestamp: Utc::now(),
            provider_name: self.name(),
            raw_payload,
        })
    }

    fn validate_symbol(&self, symbol: &str) -> bool {
        coin_id(symbol.trim().to_uppercase().as_str()).is_some()
    }

    fn rate_limit(&self) -> RateLimit {
        COINGECKO_RATE_LIMIT
    }
}
