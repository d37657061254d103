//! Scripted quote provider for offline runs and tests
//!
//! Serves deterministic price sequences per symbol, rotating through each
//! sequence so the polling loop never runs dry. Lets the full
//! fetch-persist-publish-aggregate path run without touching a real venue.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::providers::{ProviderError, Quote, QuoteProvider, RateLimit};
use crate::types::Symbol;

pub struct ScriptedProvider {
    sequences: Mutex<HashMap<Symbol, VecDeque<Decimal>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            sequences: Mutex::new(HashMap::new()),
        }
    }

    /// Register a rotating price sequence for a symbol
    pub fn with_sequence(self, symbol: Symbol, prices: Vec<Decimal>) -> Self {
        if let Ok(mut sequences) = self.sequences.try_lock() {
            sequences.insert(symbol, prices.into());
        }
        self
    }

    /// Register a constant price for a symbol
    pub fn with_constant(self, symbol: Symbol, price: Decimal) -> Self {
        self.with_sequence(symbol, vec![price])
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ProviderError> {
        let mut sequences = self.sequences.lock().await;
        let sequence = sequences
            .get_mut(symbol)
            .ok_or_else(|| ProviderError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;

        let price = sequence
            .pop_front()
            .ok_or_else(|| ProviderError::UpstreamUnavailable("empty price script".into()))?;
        sequence.push_back(price);

        let raw_payload =
            serde_json::json!({ "symbol": symbol.as_str(), "price": price }).to_string();

        Ok(Quote {
            symbol: symbol.clone(),
            price,
            timestamp: Utc::now(),
            provider_name: self.name(),
            raw_payload,
        })
    }

    fn validate_symbol(&self, symbol: &str) -> bool {
        match Symbol::parse(symbol) {
            Some(sym) => self
                .sequences
                .try_lock()
                .map(|sequences| sequences.contains_key(&sym))
                .unwrap_or(false),
            None => false,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        // Local data, effectively unthrottled
        RateLimit {
            calls: u32::MAX,
            period: Duration::from_secs(1),
        }
    }
}
