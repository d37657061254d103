//! Storage seams for jobs, price facts, and moving averages
//!
//! The orchestrator and the pipeline only ever talk to these traits; the
//! in-memory backends in [`memory`] implement the same keyed
//! read/write/upsert contract a relational store would provide.

pub mod memory;

pub use memory::{MemoryAverageStore, MemoryFactStore, MemoryRegistry};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Job, JobStatus, MovingAverageRecord, PriceFact, Symbol};

/// Storage failures.
///
/// Fatal only for the current cycle or message; callers log, back off, and
/// retry or resume on the next interval.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable job registry, keyed by job id.
///
/// Status is the sole source of truth for job liveness; the orchestrator's
/// handle table is only a cache over it. Jobs are never deleted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Persist a new job. Fails with [`StoreError::Conflict`] on a duplicate id.
    async fn insert(&self, job: Job) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Atomically set status and error message. No-op fields stay untouched.
    async fn set_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<(), StoreError>;

    /// Record a completed cycle: bump `last_run_at` and add `new_errors`
    /// to the running error count.
    async fn record_run(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        new_errors: u64,
    ) -> Result<(), StoreError>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;
}

/// Append-only store of raw payloads and normalized price facts.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Persist a verbatim provider response; returns the reference id the
    /// fact will carry.
    async fn put_raw(&self, provider: &str, payload: &str) -> Result<Uuid, StoreError>;

    /// Append one immutable fact.
    async fn append(&self, fact: PriceFact) -> Result<(), StoreError>;

    /// Up to `limit` facts for `symbol` strictly older than `before`,
    /// returned oldest to newest. This is the consumer's trailing-window
    /// read, so it must come from durable state, not a cache.
    async fn recent_before(
        &self,
        symbol: &Symbol,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PriceFact>, StoreError>;
}

/// Upsert-by-natural-key store of moving-average records.
#[async_trait]
pub trait AverageStore: Send + Sync {
    /// Insert or overwrite the record for `(symbol, period, timestamp)`.
    /// Overwriting with identical input is what makes redelivery a no-op.
    async fn upsert(&self, record: MovingAverageRecord) -> Result<(), StoreError>;

    async fn get(
        &self,
        symbol: &Symbol,
        period: usize,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<MovingAverageRecord>, StoreError>;
}
