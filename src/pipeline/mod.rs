//! Event Pipeline - partitioned fact log, publisher, and aggregating consumer
//!
//! Facts flow symbol-keyed through an append-only partitioned log with
//! at-least-once delivery; the consumer turns them into idempotent
//! moving-average upserts. Exactly-once *effect* comes from the natural-key
//! upsert, not from the transport.

pub mod consumer;
pub mod log;
pub mod publisher;

pub use consumer::{AverageAggregator, ConsumerConfig};
pub use log::{Ack, FactTransport, LogMessage, PartitionedLog, TransportError};
pub use publisher::{FactPublisher, PublisherConfig};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::PriceFact;

/// Broker wire message for one price fact. Routing key is the symbol.
///
/// `price` crosses the wire as a JSON number carrying full decimal precision,
/// never as a float or a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactMessage {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub raw_response_id: Uuid,
}

impl From<&PriceFact> for FactMessage {
    fn from(fact: &PriceFact) -> Self {
        Self {
            symbol: fact.symbol.as_str().to_string(),
            price: fact.price,
            timestamp: fact.timestamp,
            source: fact.provider.clone(),
            raw_response_id: fact.raw_ref,
        }
    }
}

/// Publish failures.
///
/// By the time these surface the fact is already persisted locally; the
/// orchestrator logs and moves on (accepted edge data loss).
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize fact: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("publish retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Symbol;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fact_message_wire_shape() {
        let fact = PriceFact {
            id: Uuid::new_v4(),
            symbol: Symbol::parse("AAPL").unwrap(),
            price: dec!(187.31),
            timestamp: Utc::now(),
            provider: "binance".into(),
            raw_ref: Uuid::new_v4(),
        };
        let json = serde_json::to_value(FactMessage::from(&fact)).unwrap();

        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["source"], "binance");
        // Exact JSON number, not a float approximation or a string
        assert!(json["price"].is_number());
        assert_eq!(json["price"].to_string(), "187.31");
        // ISO-8601 timestamp string on the wire
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
        assert!(json.get("raw_response_id").is_some());

        let decoded: FactMessage = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.price, dec!(187.31));
    }
}
