//! Partitioned, ordered, append-only fact log
//!
//! One partition per routing key keeps per-symbol ordering; consumer groups
//! track committed offsets per partition and anything uncommitted is
//! redelivered on the next poll, which is what makes delivery at-least-once.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Transport-level failures (transient; callers back off and retry)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("stream not provisioned: {0}")]
    NotProvisioned(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Acknowledgement of one appended message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub partition: String,
    pub offset: u64,
}

/// One delivered log entry
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub id: Uuid,
    pub partition: String,
    pub offset: u64,
    pub payload: String,
}

/// Partitioned append-only transport with consumer-group pull and manual
/// offset commit.
#[async_trait]
pub trait FactTransport: Send + Sync {
    /// Create the target stream if absent; no-op otherwise.
    async fn ensure_stream(&self) -> Result<(), TransportError>;

    /// Append `payload` to the partition for `key`. Appends carrying an
    /// already-seen `message_id` are suppressed and acked with the original
    /// offset (transport-level duplicate suppression).
    async fn produce(
        &self,
        key: &str,
        message_id: Uuid,
        payload: String,
    ) -> Result<Ack, TransportError>;

    /// Pull up to `max` uncommitted messages for `group`, in per-partition
    /// order. Polling again without a commit redelivers the same messages.
    async fn poll_batch(&self, group: &str, max: usize) -> Result<Vec<LogMessage>, TransportError>;

    /// Advance `group`'s committed offset for `partition` to `upto`
    /// (exclusive).
    async fn commit(&self, group: &str, partition: &str, upto: u64) -> Result<(), TransportError>;
}

struct Entry {
    id: Uuid,
    payload: String,
}

#[derive(Default)]
struct LogState {
    provisioned: bool,
    partitions: HashMap<String, Vec<Entry>>,
    seen_ids: HashSet<Uuid>,
    /// committed offset (exclusive) per (group, partition)
    offsets: HashMap<(String, String), u64>,
}

/// In-process implementation of [`FactTransport`]
pub struct PartitionedLog {
    stream: String,
    state: Mutex<LogState>,
}

impl PartitionedLog {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            state: Mutex::new(LogState::default()),
        }
    }

    /// Total appended messages across partitions (test support)
    pub async fn depth(&self) -> usize {
        let state = self.state.lock().await;
        state.partitions.values().map(Vec::len).sum()
    }

    /// Appended messages in one partition (test support)
    pub async fn partition_depth(&self, key: &str) -> usize {
        let state = self.state.lock().await;
        state.partitions.get(key).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl FactTransport for PartitionedLog {
    async fn ensure_stream(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if !state.provisioned {
            tracing::info!(stream = %self.stream, "provisioned fact stream");
            state.provisioned = true;
        }
        Ok(())
    }

    async fn produce(
        &self,
        key: &str,
        message_id: Uuid,
        payload: String,
    ) -> Result<Ack, TransportError> {
        let mut state = self.state.lock().await;
        if !state.provisioned {
            return Err(TransportError::NotProvisioned(self.stream.clone()));
        }

        if state.seen_ids.contains(&message_id) {
            // Duplicate producer append: ack at the existing offset
            let offset = state
                .partitions
                .get(key)
                .and_then(|entries| entries.iter().position(|e| e.id == message_id))
                .unwrap_or(0) as u64;
            return Ok(Ack {
                partition: key.to_string(),
                offset,
            });
        }

        state.seen_ids.insert(message_id);
        let entries = state.partitions.entry(key.to_string()).or_default();
        entries.push(Entry {
            id: message_id,
            payload,
        });
        Ok(Ack {
            partition: key.to_string(),
            offset: (entries.len() - 1) as u64,
        })
    }

    async fn poll_batch(&self, group: &str, max: usize) -> Result<Vec<LogMessage>, TransportError> {
        let state = self.state.lock().await;
        // Subscribing ahead of the stream's creation just sees nothing yet
        if !state.provisioned {
            return Ok(Vec::new());
        }

        // Stable partition order so redelivery is deterministic
        let mut keys: Vec<&String> = state.partitions.keys().collect();
        keys.sort();

        let mut batch = Vec::new();
        for key in keys {
            if batch.len() >= max {
                break;
            }
            let committed = state
                .offsets
                .get(&(group.to_string(), key.clone()))
                .copied()
                .unwrap_or(0) as usize;
            let entries = &state.partitions[key];
            for (i, entry) in entries.iter().enumerate().skip(committed) {
                if batch.len() >= max {
                    break;
                }
                batch.push(LogMessage {
                    id: entry.id,
                    partition: key.clone(),
                    offset: i as u64,
                    payload: entry.payload.clone(),
                });
            }
        }
        Ok(batch)
    }

    async fn commit(&self, group: &str, partition: &str, upto: u64) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let key = (group.to_string(), partition.to_string());
        let committed = state.offsets.entry(key).or_insert(0);
        // Commits never move backwards
        if upto > *committed {
            *committed = upto;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn provisioned_log() -> PartitionedLog {
        let log = PartitionedLog::new("price-facts");
        log.ensure_stream().await.unwrap();
        log
    }

    #[tokio::test]
    async fn test_produce_requires_provisioning() {
        let log = PartitionedLog::new("price-facts");
        let err = log
            .produce("AAPL", Uuid::new_v4(), "{}".into())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotProvisioned(_)));
    }

    #[tokio::test]
    async fn test_per_partition_ordering() {
        let log = provisioned_log().await;
        for i in 0..3 {
            log.produce("AAPL", Uuid::new_v4(), format!("a{i}"))
                .await
                .unwrap();
        }
        log.produce("MSFT", Uuid::new_v4(), "m0".into())
            .await
            .unwrap();

        let batch = log.poll_batch("group", 10).await.unwrap();
        let aapl: Vec<&str> = batch
            .iter()
            .filter(|m| m.partition == "AAPL")
            .map(|m| m.payload.as_str())
            .collect();
        assert_eq!(aapl, vec!["a0", "a1", "a2"]);
    }

    #[tokio::test]
    async fn test_redelivery_until_commit() {
        let log = provisioned_log().await;
        log.produce("AAPL", Uuid::new_v4(), "a0".into())
            .await
            .unwrap();

        assert_eq!(log.poll_batch("group", 10).await.unwrap().len(), 1);
        // No commit: same message comes back
        assert_eq!(log.poll_batch("group", 10).await.unwrap().len(), 1);

        log.commit("group", "AAPL", 1).await.unwrap();
        assert!(log.poll_batch("group", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_producer_append_suppressed() {
        let log = provisioned_log().await;
        let id = Uuid::new_v4();
        let first = log.produce("AAPL", id, "a0".into()).await.unwrap();
        let second = log.produce("AAPL", id, "a0".into()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(log.partition_depth("AAPL").await, 1);
    }

    #[tokio::test]
    async fn test_groups_track_independent_offsets() {
        let log = provisioned_log().await;
        log.produce("AAPL", Uuid::new_v4(), "a0".into())
            .await
            .unwrap();

        log.commit("averages", "AAPL", 1).await.unwrap();
        assert!(log.poll_batch("averages", 10).await.unwrap().is_empty());
        assert_eq!(log.poll_batch("audit", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_never_regresses() {
        let log = provisioned_log().await;
        for i in 0..2 {
            log.produce("AAPL", Uuid::new_v4(), format!("a{i}"))
                .await
                .unwrap();
        }
        log.commit("group", "AAPL", 2).await.unwrap();
        log.commit("group", "AAPL", 1).await.unwrap();
        assert!(log.poll_batch("group", 10).await.unwrap().is_empty());
    }
}
