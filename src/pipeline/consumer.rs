//! Event consumer - turns fact messages into moving-average upserts
//!
//! Pulls commit batches from one consumer group. Malformed messages are
//! dropped and logged; store failures leave the message uncommitted so the
//! next poll redelivers it. Offsets are committed only after the batch has
//! been persisted, so a crash before commit reprocesses instead of losing
//! data. Reprocessing is harmless: the upsert is keyed by
//! `(symbol, period, timestamp)`.

use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::average::{trailing_mean, WindowMean};
use crate::pipeline::log::{FactTransport, TransportError};
use crate::pipeline::FactMessage;
use crate::store::{AverageStore, FactStore, StoreError};
use crate::types::{MovingAverageRecord, Symbol};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Logical consumer group name
    pub group: String,
    /// Max messages pulled per batch
    pub batch_size: usize,
    /// Idle delay between polls when the log is drained
    pub poll_interval: Duration,
    /// Moving-average window size
    pub period: usize,
    /// Base backoff after a transport failure (jitter added)
    pub backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "moving-averages".into(),
            batch_size: 64,
            poll_interval: Duration::from_millis(500),
            period: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

pub struct AverageAggregator {
    transport: Arc<dyn FactTransport>,
    facts: Arc<dyn FactStore>,
    averages: Arc<dyn AverageStore>,
    config: ConsumerConfig,
}

impl AverageAggregator {
    pub fn new(
        transport: Arc<dyn FactTransport>,
        facts: Arc<dyn FactStore>,
        averages: Arc<dyn AverageStore>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            transport,
            facts,
            averages,
            config,
        }
    }

    /// Consume until the cancel signal flips.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        info!(group = %self.config.group, period = self.config.period, "consumer started");

        loop {
            if *cancel.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(0) => {
                    // Drained; idle until the next poll tick
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = cancel.changed() => {}
                    }
                }
                Ok(handled) => {
                    debug!(handled, "batch committed");
                }
                Err(e) => {
                    let jitter_ms =
                        rand::thread_rng().gen_range(0..=self.config.backoff.as_millis() as u64 / 2);
                    let delay = self.config.backoff + Duration::from_millis(jitter_ms);
                    warn!(error = %e, "transport failure, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.changed() => {}
                    }
                }
            }
        }

        info!(group = %self.config.group, "consumer stopped");
    }

    /// Poll one batch, persist what it yields, commit what persisted.
    ///
    /// Returns the number of messages whose offsets were committed. A store
    /// failure freezes that partition's commit point for the batch; ordering
    /// within the partition means later messages there stay uncommitted too.
    pub async fn run_once(&self) -> Result<usize, TransportError> {
        let batch = self
            .transport
            .poll_batch(&self.config.group, self.config.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut commits: HashMap<String, u64> = HashMap::new();
        let mut stalled: HashSet<String> = HashSet::new();
        let mut handled = 0usize;

        for message in &batch {
            if stalled.contains(&message.partition) {
                continue;
            }

            let parsed: Option<(Symbol, FactMessage)> =
                match serde_json::from_str::<FactMessage>(&message.payload) {
                    Ok(fact) => match Symbol::parse(&fact.symbol) {
                        Some(symbol) => Some((symbol, fact)),
                        None => {
                            warn!(
                                partition = %message.partition,
                                offset = message.offset,
                                symbol = %fact.symbol,
                                "dropping fact with invalid symbol"
                            );
                            None
                        }
                    },
                    Err(e) => {
                        warn!(
                            partition = %message.partition,
                            offset = message.offset,
                            error = %e,
                            "dropping malformed fact message"
                        );
                        None
                    }
                };

            // Malformed input is not retried: advance past it
            if let Some((symbol, fact)) = parsed {
                if let Err(e) = self.apply(&symbol, &fact).await {
                    warn!(
                        partition = %message.partition,
                        offset = message.offset,
                        error = %e,
                        "store failure, leaving message uncommitted"
                    );
                    stalled.insert(message.partition.clone());
                    continue;
                }
            }

            commits.insert(message.partition.clone(), message.offset + 1);
            handled += 1;
        }

        for (partition, upto) in commits {
            self.transport
                .commit(&self.config.group, &partition, upto)
                .await?;
        }
        Ok(handled)
    }

    /// Compute and upsert the trailing average for one fact message.
    ///
    /// The window is rebuilt from durable storage on every message: the
    /// newest `period - 1` facts older than the message, plus the message's
    /// own price. Fewer than `period` samples is a silent skip.
    async fn apply(&self, symbol: &Symbol, fact: &FactMessage) -> Result<(), StoreError> {
        let period = self.config.period;
        let prior = self
            .facts
            .recent_before(symbol, fact.timestamp, period.saturating_sub(1))
            .await?;

        let mut window: Vec<rust_decimal::Decimal> = prior.iter().map(|f| f.price).collect();
        window.push(fact.price);

        match trailing_mean(&window, period) {
            WindowMean::Insufficient { have, need } => {
                debug!(symbol = %symbol, have, need, "window not yet full, skipping");
                Ok(())
            }
            WindowMean::Value(value) => {
                self.averages
                    .upsert(MovingAverageRecord {
                        symbol: symbol.clone(),
                        period,
                        value,
                        sample_count: period,
                        timestamp: fact.timestamp,
                    })
                    .await?;
                debug!(symbol = %symbol, %value, "moving average upserted");
                Ok(())
            }
        }
    }
}
