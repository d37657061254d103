//! Polling Orchestrator - supervised polling tasks, one per active job
//!
//! Owns the job lifecycle: validated creation, cooperative stop, crash
//! restore, and status merge. The registry's persisted status is the sole
//! source of truth; the in-memory handle table is a liveness cache that each
//! task cleans up behind itself.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::pipeline::FactPublisher;
use crate::providers::QuoteProvider;
use crate::store::{FactStore, JobRegistry, StoreError};
use crate::types::{Job, JobStatus, JobStatusView, PriceFact, ProviderKind, Symbol};

/// Job-creation validation failures. Surfaced synchronously; nothing is
/// persisted when one of these fires.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("at least one symbol is required")]
    NoSymbols,

    #[error("too many symbols: {count} (max {max})")]
    TooManySymbols { count: usize, max: usize },

    #[error("invalid symbol: {raw:?}")]
    InvalidSymbol { raw: String },

    #[error("interval {secs}s below minimum {min}s")]
    IntervalTooShort { secs: u64, min: u64 },

    #[error("interval {secs}s above maximum {max}s")]
    IntervalTooLong { secs: u64, max: u64 },

    #[error("no provider registered for {0}")]
    UnknownProvider(ProviderKind),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validation bounds for job creation
#[derive(Debug, Clone)]
pub struct PollingLimits {
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub max_symbols_per_job: usize,
}

impl Default for PollingLimits {
    fn default() -> Self {
        Self {
            min_interval_secs: 5,
            max_interval_secs: 3600,
            max_symbols_per_job: 25,
        }
    }
}

struct JobHandle {
    join: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

/// Everything a polling task needs, cloned once per spawn
struct TaskContext {
    registry: Arc<dyn JobRegistry>,
    facts: Arc<dyn FactStore>,
    publisher: Arc<FactPublisher>,
    provider: Arc<dyn QuoteProvider>,
    running: Arc<Mutex<HashMap<Uuid, JobHandle>>>,
}

pub struct Orchestrator {
    registry: Arc<dyn JobRegistry>,
    facts: Arc<dyn FactStore>,
    publisher: Arc<FactPublisher>,
    providers: HashMap<ProviderKind, Arc<dyn QuoteProvider>>,
    limits: PollingLimits,
    running: Arc<Mutex<HashMap<Uuid, JobHandle>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        facts: Arc<dyn FactStore>,
        publisher: Arc<FactPublisher>,
        providers: HashMap<ProviderKind, Arc<dyn QuoteProvider>>,
        limits: PollingLimits,
    ) -> Self {
        Self {
            registry,
            facts,
            publisher,
            providers,
            limits,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate, persist with status `accepted`, spawn the supervised task,
    /// return the new job id. Post-acceptance failures never come back
    /// through this call; they surface in job status fields.
    pub async fn create_job(
        &self,
        symbols: &[String],
        interval_secs: u64,
        provider: ProviderKind,
    ) -> Result<Uuid, OrchestratorError> {
        let symbols = self.validate(symbols, interval_secs, provider)?;

        let job = Job {
            id: Uuid::new_v4(),
            symbols,
            interval_secs,
            provider,
            status: JobStatus::Accepted,
            created_at: Utc::now(),
            last_run_at: None,
            error_message: None,
            error_count: 0,
        };
        let id = job.id;

        self.registry.insert(job.clone()).await?;
        self.spawn_task(job).await;
        info!(job_id = %id, provider = %provider, interval_secs, "job created");
        Ok(id)
    }

    /// Cancel the running task (if any), await its full exit, then mark the
    /// job stopped. `false` only for unknown ids; stopping an already
    /// stopped job is a harmless `true`.
    pub async fn stop_job(&self, id: Uuid) -> Result<bool, StoreError> {
        if self.registry.get(id).await?.is_none() {
            return Ok(false);
        }

        // Take the handle out first so the lock is not held across the join
        let handle = self.running.lock().await.remove(&id);
        if let Some(handle) = handle {
            let _ = handle.cancel.send(true);
            if let Err(e) = handle.join.await {
                warn!(job_id = %id, error = %e, "polling task did not exit cleanly");
            }
        }

        self.registry.set_status(id, JobStatus::Stopped, None).await?;
        info!(job_id = %id, "job stopped");
        Ok(true)
    }

    /// Re-spawn a supervised task for every registry job still marked
    /// active. Run once at process start; ids with a live handle are
    /// skipped, so calling it again is safe.
    pub async fn restore_jobs(&self) -> Result<usize, StoreError> {
        let jobs = self.registry.list_by_status(JobStatus::Active).await?;
        let mut resumed = 0usize;

        for job in jobs {
            if self.running.lock().await.contains_key(&job.id) {
                continue;
            }
            if !self.providers.contains_key(&job.provider) {
                warn!(job_id = %job.id, provider = %job.provider, "cannot restore: provider not wired");
                continue;
            }
            self.spawn_task(job).await;
            resumed += 1;
        }

        info!(resumed, "restored active jobs");
        Ok(resumed)
    }

    /// Persisted job fields merged with the handle table's liveness flag
    pub async fn get_status(&self, id: Uuid) -> Result<Option<JobStatusView>, StoreError> {
        let Some(job) = self.registry.get(id).await? else {
            return Ok(None);
        };
        let is_running = self.running.lock().await.contains_key(&id);
        Ok(Some(JobStatusView {
            job_id: job.id,
            symbols: job.symbols,
            interval_secs: job.interval_secs,
            provider: job.provider,
            status: job.status,
            created_at: job.created_at,
            last_run_at: job.last_run_at,
            error_message: job.error_message,
            error_count: job.error_count,
            is_running,
        }))
    }

    /// Number of live task handles
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Stop every live job (shutdown path)
    pub async fn stop_all(&self) -> Result<(), StoreError> {
        let ids: Vec<Uuid> = self.running.lock().await.keys().copied().collect();
        for id in ids {
            self.stop_job(id).await?;
        }
        Ok(())
    }

    fn validate(
        &self,
        symbols: &[String],
        interval_secs: u64,
        provider: ProviderKind,
    ) -> Result<Vec<Symbol>, ValidationError> {
        if symbols.is_empty() {
            return Err(ValidationError::NoSymbols);
        }
        if interval_secs < self.limits.min_interval_secs {
            return Err(ValidationError::IntervalTooShort {
                secs: interval_secs,
                min: self.limits.min_interval_secs,
            });
        }
        if interval_secs > self.limits.max_interval_secs {
            return Err(ValidationError::IntervalTooLong {
                secs: interval_secs,
                max: self.limits.max_interval_secs,
            });
        }
        if !self.providers.contains_key(&provider) {
            return Err(ValidationError::UnknownProvider(provider));
        }

        // Normalize and deduplicate, preserving request order
        let mut normalized: Vec<Symbol> = Vec::with_capacity(symbols.len());
        for raw in symbols {
            let symbol = Symbol::parse(raw).ok_or_else(|| ValidationError::InvalidSymbol {
                raw: raw.clone(),
            })?;
            if !normalized.contains(&symbol) {
                normalized.push(symbol);
            }
        }
        if normalized.len() > self.limits.max_symbols_per_job {
            return Err(ValidationError::TooManySymbols {
                count: normalized.len(),
                max: self.limits.max_symbols_per_job,
            });
        }
        Ok(normalized)
    }

    async fn spawn_task(&self, job: Job) {
        let provider = match self.providers.get(&job.provider) {
            Some(p) => p.clone(),
            // Guarded by validate/restore_jobs; bail defensively anyway
            None => {
                error!(job_id = %job.id, provider = %job.provider, "no provider, task not spawned");
                return;
            }
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = TaskContext {
            registry: self.registry.clone(),
            facts: self.facts.clone(),
            publisher: self.publisher.clone(),
            provider,
            running: self.running.clone(),
        };
        let id = job.id;

        // Hold the table lock across spawn + insert so the task's own
        // cleanup (which takes the same lock) cannot race the insert.
        let mut running = self.running.lock().await;
        let join = tokio::spawn(async move {
            if let Err(e) = run_job_loop(&ctx, &job, cancel_rx).await {
                // The only path into `failed`
                error!(job_id = %id, error = %e, "polling task failed");
                if let Err(se) = ctx
                    .registry
                    .set_status(id, JobStatus::Failed, Some(e.to_string()))
                    .await
                {
                    error!(job_id = %id, error = %se, "could not persist failed status");
                }
            }
            ctx.running.lock().await.remove(&id);
        });
        running.insert(
            id,
            JobHandle {
                join,
                cancel: cancel_tx,
            },
        );
    }
}

/// One job's polling loop.
///
/// Cancellation is cooperative: the signal is checked at the loop boundary
/// and raced against the inter-cycle sleep, never mid-step. An error
/// propagating out of here marks the job failed.
async fn run_job_loop(
    ctx: &TaskContext,
    job: &Job,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    ctx.registry
        .set_status(job.id, JobStatus::Active, None)
        .await
        .context("activating job")?;

    let interval = Duration::from_secs(job.interval_secs);

    loop {
        if *cancel.borrow() {
            break;
        }

        // Persisted status is authoritative; an external stop or a vanished
        // record ends the loop. A registry we cannot read is fatal, since
        // liveness can no longer be verified.
        let current = ctx
            .registry
            .get(job.id)
            .await
            .context("reading job status")?;
        match current {
            Some(j) if j.status == JobStatus::Active => {}
            _ => break,
        }

        let mut cycle_errors = 0u64;
        for symbol in &job.symbols {
            if let Err(e) = poll_symbol(ctx, symbol).await {
                warn!(job_id = %job.id, symbol = %symbol, error = %e, "symbol poll failed");
                cycle_errors += 1;
            }
        }

        // Cycle-local persistence trouble: log and resume next interval
        if let Err(e) = ctx.registry.record_run(job.id, Utc::now(), cycle_errors).await {
            warn!(job_id = %job.id, error = %e, "could not record cycle");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.changed() => {}
        }
    }

    Ok(())
}

/// Fetch, persist raw + fact, publish - in isolation per symbol.
///
/// Publish failure is logged here and swallowed: the fact is already
/// durable, and edge data loss on the channel is an accepted tradeoff.
async fn poll_symbol(ctx: &TaskContext, symbol: &Symbol) -> Result<()> {
    let quote = ctx.provider.fetch_quote(symbol).await?;

    let raw_ref = ctx
        .facts
        .put_raw(quote.provider_name, &quote.raw_payload)
        .await?;
    let fact = PriceFact {
        id: Uuid::new_v4(),
        symbol: symbol.clone(),
        price: quote.price,
        timestamp: quote.timestamp,
        provider: quote.provider_name.to_string(),
        raw_ref,
    };
    ctx.facts.append(fact.clone()).await?;

    if let Err(e) = ctx.publisher.produce(&fact).await {
        warn!(symbol = %symbol, error = %e, "fact persisted but not published this cycle");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PartitionedLog, PublisherConfig};
    use crate::providers::ScriptedProvider;
    use crate::store::{MemoryFactStore, MemoryRegistry};
    use rust_decimal_macros::dec;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    struct Fixture {
        registry: Arc<MemoryRegistry>,
        orchestrator: Orchestrator,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(MemoryRegistry::new());
        let facts = Arc::new(MemoryFactStore::new());
        let log = Arc::new(PartitionedLog::new("price-facts"));
        let publisher = Arc::new(FactPublisher::new(log, PublisherConfig::default()));

        let provider = ScriptedProvider::new()
            .with_sequence(sym("AAPL"), vec![dec!(100), dec!(101), dec!(99)])
            .with_constant(sym("MSFT"), dec!(410));
        let mut providers: HashMap<ProviderKind, Arc<dyn QuoteProvider>> = HashMap::new();
        providers.insert(ProviderKind::Scripted, Arc::new(provider));

        let orchestrator = Orchestrator::new(
            registry.clone(),
            facts,
            publisher,
            providers,
            PollingLimits {
                min_interval_secs: 5,
                max_interval_secs: 3600,
                max_symbols_per_job: 3,
            },
        );
        Fixture {
            registry,
            orchestrator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_below_minimum_persists_nothing() {
        let fx = fixture();
        let err = fx
            .orchestrator
            .create_job(&["AAPL".into()], 1, ProviderKind::Scripted)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Validation(ValidationError::IntervalTooShort { .. })
        ));
        assert!(fx.registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_oversized_symbol_sets_rejected() {
        let fx = fixture();
        assert!(matches!(
            fx.orchestrator
                .create_job(&[], 60, ProviderKind::Scripted)
                .await,
            Err(OrchestratorError::Validation(ValidationError::NoSymbols))
        ));

        let many: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        assert!(matches!(
            fx.orchestrator
                .create_job(&many, 60, ProviderKind::Scripted)
                .await,
            Err(OrchestratorError::Validation(
                ValidationError::TooManySymbols { count: 4, max: 3 }
            ))
        ));
        assert!(fx.registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_symbols_normalized_and_deduped() {
        let fx = fixture();
        let id = fx
            .orchestrator
            .create_job(
                &["aapl".into(), " AAPL ".into(), "msft".into()],
                60,
                ProviderKind::Scripted,
            )
            .await
            .unwrap();

        let view = fx.orchestrator.get_status(id).await.unwrap().unwrap();
        assert_eq!(view.symbols, vec![sym("AAPL"), sym("MSFT")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unknown_job_is_false() {
        let fx = fixture();
        assert!(!fx.orchestrator.stop_job(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_running_job_awaits_exit() {
        let fx = fixture();
        let id = fx
            .orchestrator
            .create_job(&["AAPL".into()], 60, ProviderKind::Scripted)
            .await
            .unwrap();

        // Let the first cycle run
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.orchestrator.stop_job(id).await.unwrap());

        let view = fx.orchestrator.get_status(id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Stopped);
        assert!(!view.is_running);
        assert_eq!(fx.orchestrator.running_count().await, 0);

        // Idempotent
        assert!(fx.orchestrator.stop_job(id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_goes_active_and_records_runs() {
        let fx = fixture();
        let id = fx
            .orchestrator
            .create_job(&["AAPL".into()], 60, ProviderKind::Scripted)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let view = fx.orchestrator.get_status(id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Active);
        assert!(view.is_running);
        assert!(view.last_run_at.is_some());
        assert_eq!(view.error_count, 0);

        fx.orchestrator.stop_job(id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_failure_counts_but_does_not_kill_job() {
        let fx = fixture();
        // GOOG has no script: every cycle logs a symbol failure
        let id = fx
            .orchestrator
            .create_job(
                &["AAPL".into(), "GOOG".into()],
                60,
                ProviderKind::Scripted,
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        let view = fx.orchestrator.get_status(id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Active);
        assert!(view.error_count >= 2);

        fx.orchestrator.stop_job(id).await.unwrap();
    }

    fn active_job(id: Uuid) -> Job {
        Job {
            id,
            symbols: vec![sym("AAPL")],
            interval_secs: 60,
            provider: ProviderKind::Scripted,
            status: JobStatus::Active,
            created_at: Utc::now(),
            last_run_at: None,
            error_message: None,
            error_count: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_outage_marks_job_failed() {
        use crate::store::MockJobRegistry;

        // Persisted status transitions, captured as the task makes them
        let recorded: Arc<std::sync::Mutex<Vec<(JobStatus, Option<String>)>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut registry = MockJobRegistry::new();
        registry.expect_insert().returning(|_| Ok(()));
        // First status read sees the job active; every read after that hits
        // an outage, which is fatal to the task
        registry
            .expect_get()
            .times(1)
            .returning(|id| Ok(Some(active_job(id))));
        registry
            .expect_get()
            .returning(|_| Err(StoreError::Unavailable("registry down".into())));
        registry.expect_record_run().returning(|_, _, _| Ok(()));
        {
            let recorded = recorded.clone();
            registry
                .expect_set_status()
                .returning(move |_, status, message| {
                    recorded.lock().unwrap().push((status, message));
                    Ok(())
                });
        }

        let facts = Arc::new(MemoryFactStore::new());
        let log = Arc::new(PartitionedLog::new("price-facts"));
        let publisher = Arc::new(FactPublisher::new(log, PublisherConfig::default()));
        let provider = ScriptedProvider::new().with_constant(sym("AAPL"), dec!(100));
        let mut providers: HashMap<ProviderKind, Arc<dyn QuoteProvider>> = HashMap::new();
        providers.insert(ProviderKind::Scripted, Arc::new(provider));

        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            facts,
            publisher,
            providers,
            PollingLimits::default(),
        );
        orchestrator
            .create_job(&["AAPL".into()], 60, ProviderKind::Scripted)
            .await
            .unwrap();

        // One clean cycle, then the outage on the next status read
        tokio::time::sleep(Duration::from_secs(61)).await;

        // Task removed itself from the live set on the way out
        assert_eq!(orchestrator.running_count().await, 0);

        let transitions = recorded.lock().unwrap().clone();
        assert_eq!(transitions.first().unwrap().0, JobStatus::Active);
        let (status, message) = transitions.last().unwrap().clone();
        assert_eq!(status, JobStatus::Failed);
        assert!(message.unwrap().contains("registry down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_resumes_exactly_active_jobs() {
        let fx = fixture();
        // Simulate pre-crash state: two active, one stopped, directly in the registry
        for status in [JobStatus::Active, JobStatus::Active, JobStatus::Stopped] {
            fx.registry
                .insert(Job {
                    id: Uuid::new_v4(),
                    symbols: vec![sym("AAPL")],
                    interval_secs: 60,
                    provider: ProviderKind::Scripted,
                    status,
                    created_at: Utc::now(),
                    last_run_at: None,
                    error_message: None,
                    error_count: 0,
                })
                .await
                .unwrap();
        }

        assert_eq!(fx.orchestrator.restore_jobs().await.unwrap(), 2);
        assert_eq!(fx.orchestrator.running_count().await, 2);

        // Second restore finds live handles and resumes nothing
        assert_eq!(fx.orchestrator.restore_jobs().await.unwrap(), 0);
        assert_eq!(fx.orchestrator.running_count().await, 2);

        fx.orchestrator.stop_all().await.unwrap();
        assert_eq!(fx.orchestrator.running_count().await, 0);
    }
}
