//! Integration Tests - End-to-end Ledger and Settlement Flows
//!
//! Tests the interaction between usecases, ports, and adapters.
//! Uses mockall for the cache and queue ports and tokio::test for
//! async flows over the in-memory store, including restarts rebuilt
//! from the ledger journal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mockall::mock;
use mockall::predicate::*;
use tokio::sync::watch;
use tokio_test::{assert_err, assert_ok};

use point_ledger::adapters::coordination::LocalLockManager;
use point_ledger::adapters::metrics::ServiceMetrics;
use point_ledger::adapters::persistence::{LedgerJournal, MemoryStore, StoreTables};
use point_ledger::adapters::queue::InProcessQueue;
use point_ledger::config::AdmissionConfig;
use point_ledger::domain::errors::{LedgerError, SettlementError};
use point_ledger::domain::fees::FeeSchedule;
use point_ledger::domain::admission::AdmissionRejection;
use point_ledger::domain::types::{
    Choice, LedgerEntryType, LedgerRef, PoolStats, Resolution, TopicStatus,
};
use point_ledger::ports::cache::SharedCache;
use point_ledger::ports::job_queue::{EnqueueOutcome, JobKind, JobQueue, JobState, SettlementJob};
use point_ledger::ports::lock::{LockManager, user_key};
use point_ledger::ports::store::LedgerStore;
use point_ledger::usecases::bets::{BetError, BetService, PlaceBetRequest};
use point_ledger::usecases::ledger_writer::{DeltaRequest, LedgerWriter};
use point_ledger::usecases::pool_cache::PoolCache;
use point_ledger::usecases::settlement::{SettlementOrchestrator, SettlementOutcome};
use point_ledger::usecases::settlement_jobs::{JobRunner, RecoverySweep, RetryPolicy};
use point_ledger::usecases::topics::{ResolutionRequest, TopicError, TopicService};

// ---- Mock Definitions ----

mock! {
    pub Cache {}

    #[async_trait::async_trait]
    impl SharedCache for Cache {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
        async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
    }
}

mock! {
    pub Queue {}

    #[async_trait::async_trait]
    impl JobQueue for Queue {
        async fn submit(&self, job: SettlementJob) -> anyhow::Result<EnqueueOutcome>;
        async fn clear(&self, topic_id: &str) -> anyhow::Result<bool>;
        async fn prune_completed(&self) -> anyhow::Result<usize>;
        async fn state(&self, topic_id: &str) -> Option<JobState>;
        fn backend(&self) -> &'static str;
    }
}

// ---- Fixture ----

struct Engine {
    store: Arc<MemoryStore>,
    locks: Arc<LocalLockManager>,
    metrics: Arc<ServiceMetrics>,
    writer: Arc<LedgerWriter>,
    runner: Arc<JobRunner>,
    orchestrator: Arc<SettlementOrchestrator>,
}

fn engine(fees: FeeSchedule) -> Engine {
    engine_over(Arc::new(MemoryStore::new()), fees, Duration::from_secs(2))
}

/// Engine over an existing store; `user_lock_wait` bounds ledger writes.
fn engine_over(store: Arc<MemoryStore>, fees: FeeSchedule, user_lock_wait: Duration) -> Engine {
    let locks = Arc::new(LocalLockManager::new());
    let metrics = Arc::new(ServiceMetrics::new().unwrap());
    let writer = Arc::new(LedgerWriter::new(
        store.clone(),
        locks.clone(),
        user_lock_wait,
        Arc::clone(&metrics),
    ));
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        store.clone(),
        locks.clone(),
        Arc::clone(&writer),
        fees,
        Duration::from_millis(200),
        Arc::clone(&metrics),
    ));
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&orchestrator),
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        },
        Arc::clone(&metrics),
    ));
    Engine {
        store,
        locks,
        metrics,
        writer,
        runner,
        orchestrator,
    }
}

fn bet_service(e: &Engine, limits: AdmissionConfig) -> Arc<BetService> {
    let cache = Arc::new(PoolCache::new(
        true,
        Duration::from_secs(10),
        None,
        Arc::clone(&e.metrics),
    ));
    let (_tx, rx) = watch::channel(limits);
    Arc::new(BetService::new(
        e.store.clone(),
        Arc::clone(&e.writer),
        cache,
        rx,
        Arc::clone(&e.metrics),
    ))
}

async fn fund(e: &Engine, user: &str, amount: i64) {
    e.writer
        .apply_delta(DeltaRequest::new(user, amount, LedgerEntryType::Reward))
        .await
        .unwrap();
}

fn bet(user: &str, topic: &str, amount: f64, choice: Choice) -> PlaceBetRequest {
    PlaceBetRequest {
        user_id: user.into(),
        topic_id: topic.into(),
        amount,
        choice,
    }
}

fn resolution(topic: &str, result: Choice) -> Resolution {
    Resolution {
        topic_id: topic.into(),
        result,
        summary: "final".into(),
        resolver_id: "admin".into(),
        resolved_at: Utc::now(),
    }
}

async fn wait_for_state(queue: &dyn JobQueue, topic: &str, want: JobState) {
    for _ in 0..200 {
        if queue.state(topic).await == Some(want) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job for {topic} never reached {want:?}");
}

// ---- End-to-end flows ----

#[tokio::test]
async fn test_bet_lock_resolve_settle_through_queue() {
    let e = engine(FeeSchedule::zero());
    let bets = bet_service(&e, AdmissionConfig::default());
    for user in ["alice", "bob", "carol"] {
        fund(&e, user, 1_000).await;
    }
    e.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();

    assert_ok!(bets.place_bet(bet("alice", "t1", 100.0, Choice::Yes)).await);
    assert_ok!(bets.place_bet(bet("bob", "t1", 300.0, Choice::No)).await);
    assert_ok!(bets.place_bet(bet("carol", "t1", 100.0, Choice::Yes)).await);

    let pool = bets.pool_stats("t1").await.unwrap();
    assert_eq!(pool.total_pool, 500);
    assert_eq!(pool.yes_pool, 200);

    let queue = InProcessQueue::new(Arc::clone(&e.runner));
    e.store.put_topic_status("t1", TopicStatus::Locked).await.unwrap();
    e.store.upsert_resolution(resolution("t1", Choice::Yes)).await.unwrap();

    let outcome = queue.submit(SettlementJob::settle("t1", "admin")).await.unwrap();
    assert_eq!(outcome, EnqueueOutcome::Accepted);
    wait_for_state(&queue, "t1", JobState::Completed).await;

    assert_eq!(e.store.balance("alice").await.unwrap(), 1_150);
    assert_eq!(e.store.balance("bob").await.unwrap(), 700);
    assert_eq!(e.store.balance("carol").await.unwrap(), 1_150);

    let record = e.store.settlement("t1").await.unwrap().unwrap();
    assert_eq!(record.payout_total, 500);
    assert_eq!(record.winner_count, 2);
    assert_eq!(
        e.store.topic("t1").await.unwrap().unwrap().status,
        TopicStatus::Resolved
    );
    assert!(e.store.reconcile().await.unwrap().is_empty());

    // Finished job blocks resubmission until pruned or cleared.
    let again = queue.submit(SettlementJob::settle("t1", "admin")).await.unwrap();
    assert_eq!(again, EnqueueOutcome::AlreadyQueued);
    assert_eq!(queue.prune_completed().await.unwrap(), 1);
    assert_eq!(queue.state("t1").await, None);
}

#[tokio::test]
async fn test_second_settlement_run_is_rejected_without_side_effects() {
    let e = engine(FeeSchedule::from_f64(0.05));
    let bets = bet_service(&e, AdmissionConfig::default());
    fund(&e, "alice", 500).await;
    fund(&e, "bob", 500).await;
    e.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    bets.place_bet(bet("alice", "t1", 100.0, Choice::Yes)).await.unwrap();
    bets.place_bet(bet("bob", "t1", 100.0, Choice::No)).await.unwrap();
    e.store.put_topic_status("t1", TopicStatus::Locked).await.unwrap();
    e.store.upsert_resolution(resolution("t1", Choice::Yes)).await.unwrap();

    let first = e.orchestrator.settle_topic("t1", "admin").await.unwrap();
    let record = match first {
        SettlementOutcome::Settled(record) => record,
        other => panic!("expected a settlement record, got {other:?}"),
    };
    assert_eq!(record.fee_collected, 10);
    assert_eq!(record.payout_total, 190);

    let alice_after = e.store.balance("alice").await.unwrap();
    assert_eq!(alice_after, 400 + 190);

    let second = e.orchestrator.settle_topic("t1", "admin").await;
    assert!(matches!(second, Err(SettlementError::AlreadySettled(_))));
    assert_eq!(e.store.balance("alice").await.unwrap(), alice_after);

    let settles = e
        .store
        .entries_for_user("alice")
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.entry_type == LedgerEntryType::BetSettle)
        .count();
    assert_eq!(settles, 1);
}

#[tokio::test]
async fn test_concurrent_bets_never_overdraw() {
    let e = engine(FeeSchedule::zero());
    let bets = bet_service(&e, AdmissionConfig::default());
    fund(&e, "alice", 100).await;
    e.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let bets = Arc::clone(&bets);
            tokio::spawn(async move { bets.place_bet(bet("alice", "t1", 30.0, Choice::Yes)).await })
        })
        .collect();

    let mut accepted = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(BetError::Ledger(LedgerError::InsufficientBalance { .. })) => insufficient += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(accepted, 3);
    assert_eq!(insufficient, 2);
    assert_eq!(e.store.balance("alice").await.unwrap(), 10);
    assert!(e.store.reconcile().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bet_settle_credit_applies_once() {
    let e = engine(FeeSchedule::zero());
    let bets = bet_service(&e, AdmissionConfig::default());
    fund(&e, "alice", 200).await;
    e.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    let placed = bets.place_bet(bet("alice", "t1", 50.0, Choice::Yes)).await.unwrap();

    let bet_row = e
        .store
        .bets_for_topic("t1")
        .await
        .unwrap()
        .into_iter()
        .find(|b| b.id == placed.bet_id)
        .unwrap();

    assert_ok!(e.writer.credit_bet(&bet_row, 80, LedgerEntryType::BetSettle).await);
    let dup = e.writer.credit_bet(&bet_row, 80, LedgerEntryType::BetSettle).await;
    assert_err!(&dup);
    assert_eq!(dup.unwrap_err().code(), "BET_SETTLE_REJECTED");

    assert_eq!(e.store.balance("alice").await.unwrap(), 150 + 80);
    let entry = e
        .store
        .find_entry(&LedgerRef::Bet(placed.bet_id), LedgerEntryType::BetSettle)
        .await
        .unwrap();
    assert_eq!(entry.map(|e| e.amount), Some(80));
}

#[tokio::test]
async fn test_repeated_settle_reference_is_duplicate() {
    let e = engine(FeeSchedule::zero());
    let request = DeltaRequest::new("alice", 40, LedgerEntryType::BetSettle)
        .with_reference(LedgerRef::Bet("bet-1".into()));

    assert_ok!(e.writer.apply_delta(request.clone()).await);
    let err = e.writer.apply_delta(request).await.unwrap_err();
    assert!(err.is_duplicate());
    assert!(matches!(err, LedgerError::DuplicateReference { .. }));
    assert_eq!(e.store.balance("alice").await.unwrap(), 40);
}

#[tokio::test]
async fn test_canceled_topic_refunded_by_pending_sweep() {
    let e = engine(FeeSchedule::zero());
    let bets = bet_service(&e, AdmissionConfig::default());
    fund(&e, "alice", 300).await;
    fund(&e, "bob", 300).await;
    e.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    bets.place_bet(bet("alice", "t1", 120.0, Choice::Yes)).await.unwrap();
    bets.place_bet(bet("bob", "t1", 80.0, Choice::No)).await.unwrap();
    e.store.put_topic_status("t1", TopicStatus::Canceled).await.unwrap();

    let queue: Arc<dyn JobQueue> = Arc::new(InProcessQueue::new(Arc::clone(&e.runner)));
    let sweep = RecoverySweep::new(
        e.store.clone(),
        Arc::clone(&e.runner),
        queue,
        "system".into(),
        2,
        10,
    );

    let report = sweep.process_pending_settlements(10).await.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.success, 1);
    assert_eq!(report.per_topic_results[0].topic_id, "t1");

    assert_eq!(e.store.balance("alice").await.unwrap(), 300);
    assert_eq!(e.store.balance("bob").await.unwrap(), 300);
    assert!(e.store.pending_refunds(10).await.unwrap().is_empty());

    let again = sweep.process_pending_settlements(10).await.unwrap();
    assert_eq!(again.total, 0);
}

#[tokio::test]
async fn test_admission_rejects_bets_on_locked_topic() {
    let e = engine(FeeSchedule::zero());
    let bets = bet_service(&e, AdmissionConfig::default());
    fund(&e, "alice", 100).await;
    e.store.put_topic_status("t1", TopicStatus::Locked).await.unwrap();

    let err = bets
        .place_bet(bet("alice", "t1", 10.0, Choice::Yes))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TOPIC_NOT_OPEN");
    assert_eq!(e.store.balance("alice").await.unwrap(), 100);
}

// ---- Mocked ports ----

#[tokio::test]
async fn test_pool_cache_remote_hit_fills_memory_tier() {
    let stats = PoolStats::from_pools(300, 100);
    let raw = serde_json::to_string(&stats).unwrap();

    let mut remote = MockCache::new();
    remote
        .expect_get()
        .with(eq("pool:t1"))
        .times(1)
        .returning(move |_| Ok(Some(raw.clone())));

    let cache = PoolCache::new(
        true,
        Duration::from_secs(10),
        Some(Arc::new(remote)),
        Arc::new(ServiceMetrics::new().unwrap()),
    );

    let first = cache.get("t1").await.unwrap();
    assert_eq!(first.yes_pool, 300);
    assert!((first.yes_price - 0.75).abs() < 1e-9);

    // Served from memory; the mock allows only one remote call.
    let second = cache.get("t1").await.unwrap();
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_pool_cache_remote_error_is_a_miss() {
    let mut remote = MockCache::new();
    remote
        .expect_get()
        .returning(|_| Err(anyhow::anyhow!("connection refused")));
    remote.expect_set().returning(|_, _, _| Ok(()));

    let cache = PoolCache::new(
        true,
        Duration::from_secs(10),
        Some(Arc::new(remote)),
        Arc::new(ServiceMetrics::new().unwrap()),
    );

    assert!(cache.get("t1").await.is_none());
    let stored = cache.set("t1", 10, 30).await;
    assert_eq!(stored.total_pool, 40);
    assert_eq!(cache.get("t1").await.unwrap().no_pool, 30);
}

#[tokio::test]
async fn test_cancel_submits_refund_job() {
    let store = Arc::new(MemoryStore::new());
    let mut queue = MockQueue::new();
    queue
        .expect_submit()
        .withf(|job| job.topic_id == "t9" && job.kind == JobKind::Refund && job.settled_by_id == "system")
        .times(1)
        .returning(|_| Ok(EnqueueOutcome::Accepted));

    let topics = TopicService::new(
        store.clone(),
        Arc::new(queue),
        Arc::new(LocalLockManager::new()),
        Duration::from_millis(100),
        "system".into(),
    );
    let topic = topics.set_status("t9", TopicStatus::Canceled).await.unwrap();
    assert_eq!(topic.status, TopicStatus::Canceled);
}

#[tokio::test]
async fn test_resubmit_clears_finished_job_first() {
    let e = engine(FeeSchedule::zero());
    e.store.put_topic_status("t1", TopicStatus::Locked).await.unwrap();
    e.store.upsert_resolution(resolution("t1", Choice::No)).await.unwrap();

    let mut queue = MockQueue::new();
    queue
        .expect_state()
        .with(eq("t1"))
        .returning(|_| Some(JobState::Failed));
    queue
        .expect_clear()
        .with(eq("t1"))
        .times(1)
        .returning(|_| Ok(true));
    queue
        .expect_submit()
        .withf(|job| job.topic_id == "t1" && job.kind == JobKind::Settle)
        .times(1)
        .returning(|_| Ok(EnqueueOutcome::Accepted));
    queue.expect_backend().return_const("mock");

    let sweep = RecoverySweep::new(
        e.store.clone(),
        Arc::clone(&e.runner),
        Arc::new(queue),
        "system".into(),
        1,
        10,
    );
    assert_eq!(sweep.resubmit_pending().await.unwrap(), 1);
}

// ---- Races and restarts ----

/// Bets a:YES 100, b:YES 100, c:NO 200 on a LOCKED topic resolved YES,
/// then a settlement run that pays a and times out on b's ledger lock.
async fn partially_settled(e: &Engine) {
    let bets = bet_service(e, AdmissionConfig::default());
    for user in ["a", "b", "c"] {
        fund(e, user, 500).await;
    }
    e.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    bets.place_bet(bet("a", "t1", 100.0, Choice::Yes)).await.unwrap();
    bets.place_bet(bet("b", "t1", 100.0, Choice::Yes)).await.unwrap();
    bets.place_bet(bet("c", "t1", 200.0, Choice::No)).await.unwrap();
    e.store.put_topic_status("t1", TopicStatus::Locked).await.unwrap();
    e.store.upsert_resolution(resolution("t1", Choice::Yes)).await.unwrap();

    let held = e
        .locks
        .acquire(&user_key("b"), Duration::from_millis(10))
        .await
        .unwrap();
    let err = e.orchestrator.settle_topic("t1", "admin").await.unwrap_err();
    assert_eq!(err.code(), "LOCK_TIMEOUT");
    drop(held);

    assert_eq!(e.store.balance("a").await.unwrap(), 400 + 200);
    assert_eq!(e.store.balance("b").await.unwrap(), 400);
}

async fn assert_fully_settled(e: &Engine) {
    let outcome = e.orchestrator.settle_topic("t1", "admin").await.unwrap();
    assert!(matches!(outcome, SettlementOutcome::Settled(_)));
    assert_eq!(e.store.balance("a").await.unwrap(), 600);
    assert_eq!(e.store.balance("b").await.unwrap(), 600);
    assert_eq!(e.store.balance("c").await.unwrap(), 300);
    assert!(e.store.reconcile().await.unwrap().is_empty());
    assert!(e.store.bets_for_topic("t1").await.unwrap().iter().all(|b| b.settled));
}

#[tokio::test]
async fn test_topic_hooks_refused_during_partial_settlement() {
    let e = engine_over(
        Arc::new(MemoryStore::new()),
        FeeSchedule::zero(),
        Duration::from_millis(50),
    );
    partially_settled(&e).await;

    let topics = TopicService::new(
        e.store.clone(),
        Arc::new(MockQueue::new()),
        e.locks.clone(),
        Duration::from_millis(100),
        "system".into(),
    );
    let err = topics
        .record_resolution(ResolutionRequest {
            topic_id: "t1".into(),
            result: Choice::No,
            summary: "changed mind".into(),
            resolver_id: "admin".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TopicError::PartiallySettled(_)));
    for status in [TopicStatus::Open, TopicStatus::Canceled] {
        let err = topics.set_status("t1", status).await.unwrap_err();
        assert_eq!(err.code(), "PARTIALLY_SETTLED");
    }
    assert_eq!(
        e.store.resolution("t1").await.unwrap().unwrap().result,
        Choice::Yes
    );

    assert_fully_settled(&e).await;
}

#[tokio::test]
async fn test_restart_mid_settlement_resumes_from_journal() {
    let dir = std::env::temp_dir()
        .join(format!("point_ledger_restart_{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    let journal = Arc::new(LedgerJournal::new(&dir).await.unwrap());
    let store = Arc::new(MemoryStore::new().with_journal(Arc::clone(&journal)));
    let before = engine_over(store, FeeSchedule::zero(), Duration::from_millis(50));
    partially_settled(&before).await;
    let tables_before_crash = before.store.snapshot().await;

    // No snapshot was ever written: everything comes back from the journal.
    let restored = Arc::new(
        MemoryStore::recover(StoreTables::default(), journal.load_records().await.unwrap())
            .with_journal(Arc::clone(&journal)),
    );
    assert_eq!(restored.snapshot().await, tables_before_crash);

    let after = engine_over(restored, FeeSchedule::zero(), Duration::from_millis(50));
    assert_fully_settled(&after).await;

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_bet_racing_topic_lock_is_not_stranded() {
    let e = engine(FeeSchedule::zero());
    let bets = bet_service(&e, AdmissionConfig::default());
    fund(&e, "alice", 100).await;
    fund(&e, "bob", 100).await;
    e.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    bets.place_bet(bet("bob", "t1", 50.0, Choice::No)).await.unwrap();

    let held = e
        .locks
        .acquire(&user_key("alice"), Duration::from_millis(10))
        .await
        .unwrap();
    let late = {
        let bets = Arc::clone(&bets);
        tokio::spawn(async move { bets.place_bet(bet("alice", "t1", 40.0, Choice::Yes)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    e.store.put_topic_status("t1", TopicStatus::Locked).await.unwrap();
    e.store.upsert_resolution(resolution("t1", Choice::No)).await.unwrap();
    assert_ok!(e.orchestrator.settle_topic("t1", "admin").await);
    drop(held);

    let err = late.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        BetError::TopicNotOpen {
            status: TopicStatus::Resolved,
            ..
        }
    ));
    assert_eq!(e.store.balance("alice").await.unwrap(), 100);
    assert!(e.store.bets_for_topic("t1").await.unwrap().iter().all(|b| b.settled));
}

#[tokio::test]
async fn test_daily_cap_holds_under_concurrent_bets() {
    let e = engine(FeeSchedule::zero());
    let bets = bet_service(
        &e,
        AdmissionConfig {
            daily_cap: Some(100),
            ..AdmissionConfig::default()
        },
    );
    fund(&e, "alice", 1_000).await;
    e.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let bets = Arc::clone(&bets);
            tokio::spawn(async move { bets.place_bet(bet("alice", "t1", 60.0, Choice::Yes)).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(BetError::Admission(AdmissionRejection::DailyCapExceeded { cap, .. })) => {
                assert_eq!(cap, 100);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(e.store.balance("alice").await.unwrap(), 940);
}
