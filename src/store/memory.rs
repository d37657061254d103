//! In-memory store backends
//!
//! RwLock-guarded maps of typed records. These back the default wiring and
//! every test; they honor the same contracts (keyed access, append-only
//! facts, natural-key upsert) a relational backend would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{AverageStore, FactStore, JobRegistry, StoreError};
use crate::types::{Job, JobStatus, MovingAverageRecord, PriceFact, Symbol};

/// In-memory job registry
#[derive(Default)]
pub struct MemoryRegistry {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted jobs (test support)
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobRegistry for MemoryRegistry {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {} exists", job.id)));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        job.status = status;
        if error_message.is_some() {
            job.error_message = error_message;
        }
        Ok(())
    }

    async fn record_run(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        new_errors: u64,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        job.last_run_at = Some(at);
        job.error_count += new_errors;
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }
}

/// In-memory fact and raw-payload store
#[derive(Default)]
pub struct MemoryFactStore {
    raw: RwLock<HashMap<Uuid, String>>,
    facts: RwLock<HashMap<Symbol, Vec<PriceFact>>>,
}

impl MemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All facts for a symbol in append order (test support)
    pub async fn facts_for(&self, symbol: &Symbol) -> Vec<PriceFact> {
        self.facts
            .read()
            .await
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    /// Fetch a persisted raw payload by reference (test support)
    pub async fn raw_payload(&self, raw_ref: Uuid) -> Option<String> {
        self.raw.read().await.get(&raw_ref).cloned()
    }
}

#[async_trait]
impl FactStore for MemoryFactStore {
    async fn put_raw(&self, provider: &str, payload: &str) -> Result<Uuid, StoreError> {
        let raw_ref = Uuid::new_v4();
        self.raw
            .write()
            .await
            .insert(raw_ref, format!("{provider}:{payload}"));
        Ok(raw_ref)
    }

    async fn append(&self, fact: PriceFact) -> Result<(), StoreError> {
        let mut facts = self.facts.write().await;
        facts.entry(fact.symbol.clone()).or_default().push(fact);
        Ok(())
    }

    async fn recent_before(
        &self,
        symbol: &Symbol,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PriceFact>, StoreError> {
        let facts = self.facts.read().await;
        let Some(series) = facts.get(symbol) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<PriceFact> = series
            .iter()
            .filter(|f| f.timestamp < before)
            .cloned()
            .collect();
        matching.sort_by_key(|f| f.timestamp);
        if matching.len() > limit {
            matching.drain(..matching.len() - limit);
        }
        Ok(matching)
    }
}

/// In-memory moving-average store keyed by `(symbol, period, timestamp)`
#[derive(Default)]
pub struct MemoryAverageStore {
    rows: RwLock<HashMap<(Symbol, usize, DateTime<Utc>), MovingAverageRecord>>,
}

impl MemoryAverageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored records (test support)
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl AverageStore for MemoryAverageStore {
    async fn upsert(&self, record: MovingAverageRecord) -> Result<(), StoreError> {
        let key = (record.symbol.clone(), record.period, record.timestamp);
        self.rows.write().await.insert(key, record);
        Ok(())
    }

    async fn get(
        &self,
        symbol: &Symbol,
        period: usize,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<MovingAverageRecord>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .get(&(symbol.clone(), period, timestamp))
            .cloned())
    }
}
