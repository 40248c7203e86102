//! Point Ledger - Entry Point
//!
//! Initializes configuration, logging, the store, settlement workers and
//! the HTTP API. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config (POINT_LEDGER_CONFIG, default config.toml) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Restore the store: last snapshot + journal records committed after it
//! 4. Reconcile balances against ledger sums
//! 5. Create metrics, locks, LedgerWriter, SettlementOrchestrator
//! 6. Start the settlement queue (durable, or in-process fallback)
//! 7. Spawn config hot-reload, recovery sweep and snapshot tasks
//! 8. Serve API + /live + /ready + /metrics
//! 9. Wait for SIGINT → graceful shutdown (stop accepting→drain→snapshot)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use point_ledger::adapters::api::{ApiState, router};
use point_ledger::adapters::cache::HttpSharedCache;
use point_ledger::adapters::coordination::LocalLockManager;
use point_ledger::adapters::metrics::{HealthState, ServiceMetrics};
use point_ledger::adapters::persistence::{
    LedgerJournal, MemoryStore, SnapshotStore, StoreSnapshot,
};
use point_ledger::adapters::queue::{DurableQueue, InProcessQueue};
use point_ledger::config::hot_reload::ConfigWatcher;
use point_ledger::config::{self, AppConfig, QueueMode};
use point_ledger::domain::fees::FeeSchedule;
use point_ledger::ports::cache::SharedCache;
use point_ledger::ports::job_queue::JobQueue;
use point_ledger::ports::store::LedgerStore;
use point_ledger::usecases::bets::BetService;
use point_ledger::usecases::ledger_writer::LedgerWriter;
use point_ledger::usecases::pool_cache::PoolCache;
use point_ledger::usecases::settlement::SettlementOrchestrator;
use point_ledger::usecases::settlement_jobs::{JobRunner, RecoverySweep, RetryPolicy};
use point_ledger::usecases::topics::TopicService;

const CONFIG_ENV: &str = "POINT_LEDGER_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(&config.service.log_level)
                }),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        queue_mode = ?config.jobs.mode,
        bind = %config.server.bind_address,
        "Starting point ledger"
    );

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 3. Restore store from snapshot + journal ────────────
    let snapshots = Arc::new(
        SnapshotStore::new(&config.persistence.data_dir)
            .await
            .context("Failed to open snapshot store")?,
    );
    let journal = Arc::new(
        LedgerJournal::new(&config.persistence.data_dir)
            .await
            .context("Failed to open ledger journal")?,
    );
    let tables = snapshots
        .load()
        .await
        .context("Failed to load store snapshot")?
        .map(|s| s.tables)
        .unwrap_or_default();
    let records = journal
        .load_records()
        .await
        .context("Failed to load ledger journal")?;
    let memory = Arc::new(MemoryStore::recover(tables, records).with_journal(journal));
    let store: Arc<dyn LedgerStore> = memory.clone();

    // ── 4. Reconcile balances against the ledger ────────────
    let mismatches = store.reconcile().await.context("Reconciliation failed")?;
    for m in &mismatches {
        warn!(
            user_id = %m.user_id,
            balance = m.balance,
            ledger_sum = m.ledger_sum,
            "Balance does not match ledger sum"
        );
    }
    info!(mismatches = mismatches.len(), "Startup reconciliation complete");

    // ── 5. Core services ────────────────────────────────────
    let metrics = Arc::new(ServiceMetrics::new().context("Failed to register metrics")?);
    let locks = Arc::new(LocalLockManager::new());

    let writer = Arc::new(LedgerWriter::new(
        Arc::clone(&store),
        locks.clone(),
        Duration::from_millis(config.ledger.lock_wait_ms),
        Arc::clone(&metrics),
    ));
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        Arc::clone(&store),
        locks.clone(),
        Arc::clone(&writer),
        FeeSchedule::from_f64(config.settlement.fee_rate),
        Duration::from_millis(config.settlement.lock_wait_ms),
        Arc::clone(&metrics),
    ));
    let runner = Arc::new(JobRunner::new(
        orchestrator,
        RetryPolicy {
            max_attempts: config.jobs.max_attempts,
            backoff: Duration::from_millis(config.jobs.backoff_ms),
        },
        Arc::clone(&metrics),
    ));

    // ── 6. Settlement queue ─────────────────────────────────
    let queue = start_queue(&config, Arc::clone(&runner), &shutdown_tx).await;

    let health = HealthState::new(Arc::clone(&store));
    health.queue_running.store(true, Ordering::SeqCst);

    // ── 7. Background tasks ─────────────────────────────────
    let (mut watcher, limits_rx) = ConfigWatcher::new(
        &config_path,
        config.admission.clone(),
        Duration::from_secs(60),
    );
    let watcher_shutdown = shutdown_tx.subscribe();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.run(watcher_shutdown).await {
            error!(error = %e, "Config watcher failed");
        }
    });

    let remote = remote_cache(&config);
    let cache = Arc::new(PoolCache::new(
        config.cache.enabled,
        Duration::from_secs(config.cache.ttl_seconds),
        remote,
        Arc::clone(&metrics),
    ));
    let bets = Arc::new(BetService::new(
        Arc::clone(&store),
        Arc::clone(&writer),
        cache,
        limits_rx,
        Arc::clone(&metrics),
    ));
    let topics = Arc::new(TopicService::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        locks,
        Duration::from_millis(config.settlement.lock_wait_ms),
        config.settlement.system_settler_id.clone(),
    ));
    let sweep = Arc::new(RecoverySweep::new(
        Arc::clone(&store),
        runner,
        Arc::clone(&queue),
        config.settlement.system_settler_id.clone(),
        config.jobs.concurrency,
        config.jobs.sweep_batch_size,
    ));

    let sweep_handle = if config.jobs.sweep_interval_seconds > 0 {
        let sweep_ref = Arc::clone(&sweep);
        let sweep_shutdown = shutdown_tx.subscribe();
        let interval = Duration::from_secs(config.jobs.sweep_interval_seconds);
        Some(tokio::spawn(async move {
            sweep_ref.run(interval, sweep_shutdown).await;
        }))
    } else {
        info!("Recovery sweep disabled");
        None
    };

    let snapshot_handle = tokio::spawn(run_snapshots(
        Arc::clone(&memory),
        Arc::clone(&snapshots),
        Duration::from_secs(config.persistence.snapshot_interval_seconds.max(1)),
        shutdown_tx.subscribe(),
    ));

    // ── 8. HTTP server ──────────────────────────────────────
    let state = ApiState {
        writer,
        bets,
        topics,
        queue,
        sweep,
        metrics,
    };
    let app = router(state, health.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!(address = %config.server.bind_address, "API listening");

    // ── 9. Serve until SIGINT, then shut down ───────────────
    let accepting = Arc::clone(&health.accepting);
    let server_shutdown = shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for SIGINT");
            }
            info!("SIGINT received, initiating graceful shutdown");
            accepting.store(false, Ordering::SeqCst);
            let _ = server_shutdown.send(());
        })
        .await
        .context("HTTP server failed")?;

    // 1. Stop background tasks (already signalled; make sure)
    let _ = shutdown_tx.send(());

    // 2. Wait for the sweep to finish its current batch (up to 30s)
    if let Some(handle) = sweep_handle {
        let _ = tokio::time::timeout(Duration::from_secs(30), handle).await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), watcher_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), snapshot_handle).await;

    // 3. Final snapshot
    match snapshots.save(&StoreSnapshot::new(memory.snapshot().await)).await {
        Ok(()) => info!("Final snapshot saved"),
        Err(e) => error!(error = %e, "Failed to save final snapshot"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Start the configured queue backend; fall back to in-process when the
/// durable journal cannot be opened.
async fn start_queue(
    config: &AppConfig,
    runner: Arc<JobRunner>,
    shutdown_tx: &broadcast::Sender<()>,
) -> Arc<dyn JobQueue> {
    if config.jobs.mode == QueueMode::Durable {
        match DurableQueue::start(
            &config.jobs.journal_dir,
            Arc::clone(&runner),
            config.jobs.concurrency,
            shutdown_tx.subscribe(),
        )
        .await
        {
            Ok(queue) => {
                info!(dir = %config.jobs.journal_dir, "Durable settlement queue started");
                return Arc::new(queue);
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Durable queue unavailable, falling back to in-process settlement jobs"
                );
            }
        }
    } else {
        warn!("In-process settlement queue selected; pending jobs do not survive restarts");
    }
    Arc::new(InProcessQueue::new(runner))
}

fn remote_cache(config: &AppConfig) -> Option<Arc<dyn SharedCache>> {
    let url = config.cache.remote_url.as_deref()?;
    match HttpSharedCache::new(url, Duration::from_millis(config.cache.remote_timeout_ms)) {
        Ok(cache) => {
            info!(url, "Remote pool cache enabled");
            Some(Arc::new(cache))
        }
        Err(e) => {
            warn!(error = %e, "Remote pool cache disabled");
            None
        }
    }
}

/// Periodically persist the store so restarts resume from recent state.
async fn run_snapshots(
    memory: Arc<MemoryStore>,
    snapshots: Arc<SnapshotStore>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let snapshot = StoreSnapshot::new(memory.snapshot().await);
                if let Err(e) = snapshots.save(&snapshot).await {
                    error!(error = %e, "Periodic snapshot failed");
                }
            }
        }
    }
}
