//! Event publisher - serializes facts onto the partitioned log
//!
//! At-least-once with bounded retry. The fact is already persisted by the
//! time this runs; a publish that exhausts its retries is logged upstream
//! and dropped, never rolled back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::pipeline::log::{Ack, FactTransport};
use crate::pipeline::{FactMessage, PublishError};
use crate::types::PriceFact;

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Total produce attempts per fact (>= 1)
    pub attempts: u32,
    /// Delay between attempts
    pub backoff: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

pub struct FactPublisher {
    transport: Arc<dyn FactTransport>,
    config: PublisherConfig,
    provisioned: AtomicBool,
}

impl FactPublisher {
    pub fn new(transport: Arc<dyn FactTransport>, config: PublisherConfig) -> Self {
        Self {
            transport,
            config,
            provisioned: AtomicBool::new(false),
        }
    }

    /// Publish one fact, keyed by its symbol.
    ///
    /// Lazily provisions the stream before the first publish. The fact id is
    /// the transport message id, so producer-side duplicates collapse.
    pub async fn produce(&self, fact: &PriceFact) -> Result<Ack, PublishError> {
        if !self.provisioned.load(Ordering::Acquire) {
            self.transport
                .ensure_stream()
                .await
                .map_err(|e| PublishError::StreamUnavailable(e.to_string()))?;
            self.provisioned.store(true, Ordering::Release);
        }

        let payload = serde_json::to_string(&FactMessage::from(fact))?;
        let attempts = self.config.attempts.max(1);

        for attempt in 1..=attempts {
            match self
                .transport
                .produce(fact.symbol.as_str(), fact.id, payload.clone())
                .await
            {
                Ok(ack) => return Ok(ack),
                Err(e) => {
                    warn!(
                        symbol = %fact.symbol,
                        attempt,
                        attempts,
                        error = %e,
                        "publish attempt failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.backoff).await;
                    }
                }
            }
        }

        Err(PublishError::RetriesExhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::log::{LogMessage, PartitionedLog, TransportError};
    use crate::types::Symbol;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicU32;
    use uuid::Uuid;

    fn make_fact(symbol: &str) -> PriceFact {
        PriceFact {
            id: Uuid::new_v4(),
            symbol: Symbol::parse(symbol).unwrap(),
            price: dec!(100),
            timestamp: Utc::now(),
            provider: "scripted".into(),
            raw_ref: Uuid::new_v4(),
        }
    }

    /// Transport that fails the first `failures` produce calls
    struct FlakyTransport {
        inner: PartitionedLog,
        failures: AtomicU32,
    }

    #[async_trait]
    impl FactTransport for FlakyTransport {
        async fn ensure_stream(&self) -> Result<(), TransportError> {
            self.inner.ensure_stream().await
        }

        async fn produce(
            &self,
            key: &str,
            message_id: Uuid,
            payload: String,
        ) -> Result<Ack, TransportError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::Unavailable("flaky".into()));
            }
            self.inner.produce(key, message_id, payload).await
        }

        async fn poll_batch(
            &self,
            group: &str,
            max: usize,
        ) -> Result<Vec<LogMessage>, TransportError> {
            self.inner.poll_batch(group, max).await
        }

        async fn commit(
            &self,
            group: &str,
            partition: &str,
            upto: u64,
        ) -> Result<(), TransportError> {
            self.inner.commit(group, partition, upto).await
        }
    }

    #[tokio::test]
    async fn test_publish_provisions_lazily_and_acks() {
        let log = Arc::new(PartitionedLog::new("price-facts"));
        let publisher = FactPublisher::new(log.clone(), PublisherConfig::default());

        let ack = publisher.produce(&make_fact("AAPL")).await.unwrap();
        assert_eq!(ack.partition, "AAPL");
        assert_eq!(ack.offset, 0);
        assert_eq!(log.depth().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_retries_then_succeeds() {
        let transport = Arc::new(FlakyTransport {
            inner: PartitionedLog::new("price-facts"),
            failures: AtomicU32::new(1),
        });
        let publisher = FactPublisher::new(
            transport.clone(),
            PublisherConfig {
                attempts: 3,
                backoff: Duration::from_millis(10),
            },
        );

        let ack = publisher.produce(&make_fact("AAPL")).await.unwrap();
        assert_eq!(ack.offset, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_exhausts_retries() {
        let transport = Arc::new(FlakyTransport {
            inner: PartitionedLog::new("price-facts"),
            failures: AtomicU32::new(10),
        });
        let publisher = FactPublisher::new(
            transport,
            PublisherConfig {
                attempts: 2,
                backoff: Duration::from_millis(10),
            },
        );

        let err = publisher.produce(&make_fact("AAPL")).await.unwrap_err();
        assert!(matches!(
            err,
            PublishError::RetriesExhausted { attempts: 2 }
        ));
    }
}
