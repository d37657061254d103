//! pricewatch binary - wires services once at startup and runs until ctrl-c

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pricewatch::config::AppConfig;
use pricewatch::orchestrator::{Orchestrator, PollingLimits};
use pricewatch::pipeline::{
    AverageAggregator, ConsumerConfig, FactPublisher, PartitionedLog, PublisherConfig,
};
use pricewatch::providers::{
    BinanceProvider, CoinGeckoProvider, QuoteProvider, ScriptedProvider,
};
use pricewatch::store::{MemoryAverageStore, MemoryFactStore, MemoryRegistry};
use pricewatch::types::{ProviderKind, Symbol};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pricewatch=info")),
        )
        .init();

    let cfg = AppConfig::load()?;
    info!(config = %cfg.digest(), "🚀 starting pricewatch");

    // Stores and transport, constructed once and shared by reference
    let registry = Arc::new(MemoryRegistry::new());
    let facts = Arc::new(MemoryFactStore::new());
    let averages = Arc::new(MemoryAverageStore::new());
    let log = Arc::new(PartitionedLog::new(cfg.broker.stream.clone()));

    let publisher = Arc::new(FactPublisher::new(
        log.clone(),
        PublisherConfig {
            attempts: cfg.broker.publish_attempts,
            backoff: Duration::from_millis(cfg.broker.publish_backoff_ms),
        },
    ));

    let timeout = Duration::from_millis(cfg.providers.request_timeout_ms);
    let mut providers: HashMap<ProviderKind, Arc<dyn QuoteProvider>> = HashMap::new();
    providers.insert(
        ProviderKind::Binance,
        Arc::new(match &cfg.providers.binance_url {
            Some(url) => BinanceProvider::with_base_url(url, timeout),
            None => BinanceProvider::new(timeout),
        }),
    );
    providers.insert(
        ProviderKind::CoinGecko,
        Arc::new(match &cfg.providers.coingecko_url {
            Some(url) => CoinGeckoProvider::with_base_url(url, timeout),
            None => CoinGeckoProvider::new(timeout),
        }),
    );
    providers.insert(
        ProviderKind::Scripted,
        Arc::new(scripted_from_bootstrap(&cfg)),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        facts.clone(),
        publisher,
        providers,
        PollingLimits {
            min_interval_secs: cfg.polling.min_interval_secs,
            max_interval_secs: cfg.polling.max_interval_secs,
            max_symbols_per_job: cfg.polling.max_symbols_per_job,
        },
    ));

    let aggregator = Arc::new(AverageAggregator::new(
        log,
        facts,
        averages,
        ConsumerConfig {
            group: cfg.broker.consumer_group.clone(),
            batch_size: cfg.broker.batch_size,
            poll_interval: Duration::from_millis(cfg.broker.poll_interval_ms),
            period: cfg.averaging.period,
            backoff: Duration::from_millis(cfg.broker.consumer_backoff_ms),
        },
    ));

    let (consumer_cancel_tx, consumer_cancel_rx) = watch::channel(false);
    let consumer_handle = {
        let aggregator = aggregator.clone();
        tokio::spawn(async move { aggregator.run(consumer_cancel_rx).await })
    };

    // Self-healing path after a crash or restart
    let restored = orchestrator
        .restore_jobs()
        .await
        .context("restoring jobs")?;
    if restored > 0 {
        info!(restored, "resumed polling jobs from registry");
    }

    // Config-driven bootstrap job for local runs
    if !cfg.polling.bootstrap_symbols.is_empty() {
        let provider = ProviderKind::from_str(&cfg.polling.default_provider)
            .unwrap_or(ProviderKind::Scripted);
        match orchestrator
            .create_job(
                &cfg.polling.bootstrap_symbols,
                cfg.polling.bootstrap_interval_secs,
                provider,
            )
            .await
        {
            Ok(id) => info!(job_id = %id, "bootstrap job created"),
            Err(e) => warn!(error = %e, "bootstrap job rejected"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received, draining");

    if let Err(e) = orchestrator.stop_all().await {
        error!(error = %e, "error while stopping jobs");
    }
    let _ = consumer_cancel_tx.send(true);
    let _ = consumer_handle.await;

    info!("✅ pricewatch stopped");
    Ok(())
}

/// Deterministic offline provider seeded from the bootstrap symbol list
fn scripted_from_bootstrap(cfg: &AppConfig) -> ScriptedProvider {
    use rust_decimal::Decimal;

    let mut provider = ScriptedProvider::new();
    for (i, raw) in cfg.polling.bootstrap_symbols.iter().enumerate() {
        if let Some(symbol) = Symbol::parse(raw) {
            // Distinct, stable base prices so local runs produce varied series
            let base = 100 + (i as i64) * 10;
            let prices = vec![
                Decimal::from(base),
                Decimal::from(base + 1),
                Decimal::from(base - 1),
                Decimal::from(base + 2),
                Decimal::from(base - 2),
            ];
            provider = provider.with_sequence(symbol, prices);
        }
    }
    provider
}
