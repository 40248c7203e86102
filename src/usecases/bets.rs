//! Bet Use Case - Admission and Placement
//!
//! Gathers the admission context for a prospective bet and evaluates it
//! against the current (hot-reloadable) limits while the ledger writer
//! holds the user's lock, then debits the stake together with the bet
//! insert. The store re-checks that the topic is still OPEN in that same
//! write. Also serves read-through pool statistics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument};
use uuid::Uuid;

use super::ledger_writer::LedgerWriter;
use super::pool_cache::PoolCache;
use crate::adapters::metrics::ServiceMetrics;
use crate::config::AdmissionConfig;
use crate::domain::admission::{AdmissionContext, AdmissionRejection, evaluate};
use crate::domain::errors::LedgerError;
use crate::domain::types::{Bet, BetId, Choice, Points, PoolStats, TopicId, TopicStatus};
use crate::ports::store::LedgerStore;

/// Settled bets inspected when counting a loss streak.
const LOSS_STREAK_WINDOW: usize = 50;

/// A bet placement request.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceBetRequest {
  pub user_id: String,
  pub topic_id: TopicId,
  /// Client-submitted amount; must be a whole number of points.
  pub amount: f64,
  pub choice: Choice,
}

/// Accepted bet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedBet {
  pub bet_id: BetId,
  pub amount: Points,
  pub balance_after: Points,
}

/// Failures of a bet placement.
#[derive(Debug, Error)]
pub enum BetError {
  #[error(transparent)]
  Admission(#[from] AdmissionRejection),

  #[error(transparent)]
  Ledger(#[from] LedgerError),

  #[error("topic {0} not found")]
  TopicNotFound(TopicId),

  #[error("topic {topic_id} is {status} and not accepting bets")]
  TopicNotOpen { topic_id: TopicId, status: TopicStatus },

  #[error("bet store failure: {0:#}")]
  Store(#[from] anyhow::Error),
}

impl BetError {
  pub const fn code(&self) -> &'static str {
    match self {
      Self::Admission(r) => r.code(),
      Self::Ledger(e) => e.code(),
      Self::TopicNotFound(_) => "TOPIC_NOT_FOUND",
      Self::TopicNotOpen { .. } => "TOPIC_NOT_OPEN",
      Self::Store(_) => "STORE_FAILURE",
    }
  }
}

/// Consecutive losses at the head of `recent` (newest first) and the
/// time of the newest one.
fn loss_streak(recent: &[Bet]) -> (u32, Option<DateTime<Utc>>) {
  let streak = recent.iter().take_while(|b| b.is_loss()).count();
  let last = recent.first().filter(|b| b.is_loss()).and_then(|b| b.settled_at);
  (u32::try_from(streak).unwrap_or(u32::MAX), last)
}

/// Start of the UTC day containing `now`.
fn utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
  now
    .date_naive()
    .and_hms_opt(0, 0, 0)
    .map_or(now, |midnight| midnight.and_utc())
}

/// Bet placement and pool read service.
pub struct BetService {
  store: Arc<dyn LedgerStore>,
  writer: Arc<LedgerWriter>,
  cache: Arc<PoolCache>,
  limits: watch::Receiver<AdmissionConfig>,
  metrics: Arc<ServiceMetrics>,
}

impl BetService {
  pub fn new(
    store: Arc<dyn LedgerStore>,
    writer: Arc<LedgerWriter>,
    cache: Arc<PoolCache>,
    limits: watch::Receiver<AdmissionConfig>,
    metrics: Arc<ServiceMetrics>,
  ) -> Self {
    Self {
      store,
      writer,
      cache,
      limits,
      metrics,
    }
  }

  /// Validate and place a bet on an OPEN topic.
  #[instrument(skip(self, request), fields(user_id = %request.user_id, topic_id = %request.topic_id))]
  pub async fn place_bet(&self, request: PlaceBetRequest) -> Result<PlacedBet, BetError> {
    if request.user_id.trim().is_empty() {
      return Err(LedgerError::MissingUser.into());
    }

    let topic = self
      .store
      .topic(&request.topic_id)
      .await?
      .ok_or_else(|| BetError::TopicNotFound(request.topic_id.clone()))?;
    if topic.status != TopicStatus::Open {
      return Err(BetError::TopicNotOpen {
        topic_id: request.topic_id,
        status: topic.status,
      });
    }

    let bet_id: BetId = Uuid::new_v4().to_string();
    let placed = self
      .writer
      .place_stake(&request.user_id, || self.admit(&request, bet_id.clone()))
      .await;
    let applied = match placed {
      Ok(applied) => applied,
      Err(BetError::Ledger(LedgerError::TopicClosed { topic_id, status })) => {
        return Err(match status {
          Some(status) => BetError::TopicNotOpen { topic_id, status },
          None => BetError::TopicNotFound(topic_id),
        });
      }
      Err(e) => return Err(e),
    };
    self.cache.invalidate(&request.topic_id).await;

    let amount = applied.entry.amount.saturating_neg();
    info!(
      bet_id = %bet_id,
      choice = %request.choice,
      amount,
      balance_after = applied.balance_after,
      "Bet placed"
    );
    Ok(PlacedBet {
      bet_id,
      amount,
      balance_after: applied.balance_after,
    })
  }

  /// Build the admission context from committed state and evaluate it.
  /// Runs while the user's ledger lock is held.
  async fn admit(&self, request: &PlaceBetRequest, bet_id: BetId) -> Result<Bet, BetError> {
    let now = Utc::now();
    let committed_today = self
      .store
      .committed_since(&request.user_id, utc_midnight(now))
      .await?;
    let (yes_pool, no_pool) = self.store.topic_pools(&request.topic_id).await?;
    let user_topic_stake = self
      .store
      .user_topic_stake(&request.user_id, &request.topic_id)
      .await?;
    let recent = self
      .store
      .recent_settled_bets(&request.user_id, LOSS_STREAK_WINDOW)
      .await?;
    let (streak, last_loss_at) = loss_streak(&recent);

    let ctx = AdmissionContext {
      raw_amount: request.amount,
      committed_today,
      topic_pool: yes_pool.saturating_add(no_pool),
      user_topic_stake,
      loss_streak: streak,
      last_loss_at,
      now,
    };
    let limits = self.limits.borrow().clone();
    let amount = evaluate(&limits, &ctx).inspect_err(|rejection| {
      self
        .metrics
        .admission_rejections
        .with_label_values(&[rejection.code()])
        .inc();
    })?;

    Ok(Bet {
      id: bet_id,
      ..Bet::new(
        request.topic_id.clone(),
        request.user_id.clone(),
        request.choice,
        amount,
      )
    })
  }

  /// Pool totals and prices, served from cache when fresh.
  pub async fn pool_stats(&self, topic_id: &str) -> Result<PoolStats, BetError> {
    if let Some(stats) = self.cache.get(topic_id).await {
      return Ok(stats);
    }
    let (yes_pool, no_pool) = self.store.topic_pools(topic_id).await?;
    Ok(self.cache.set(topic_id, yes_pool, no_pool).await)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::adapters::coordination::LocalLockManager;
  use crate::adapters::persistence::MemoryStore;
  use crate::domain::types::LedgerEntryType;
  use crate::ports::lock::{LockManager, user_key};
  use crate::usecases::ledger_writer::DeltaRequest;

  struct Fixture {
    store: Arc<MemoryStore>,
    locks: Arc<LocalLockManager>,
    writer: Arc<LedgerWriter>,
    service: Arc<BetService>,
    limits_tx: watch::Sender<AdmissionConfig>,
  }

  fn fixture(limits: AdmissionConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let locks = Arc::new(LocalLockManager::new());
    let metrics = Arc::new(ServiceMetrics::new().unwrap());
    let writer = Arc::new(LedgerWriter::new(
      store.clone(),
      locks.clone(),
      Duration::from_millis(500),
      Arc::clone(&metrics),
    ));
    let cache = Arc::new(PoolCache::new(
      true,
      Duration::from_secs(10),
      None,
      Arc::clone(&metrics),
    ));
    let (limits_tx, limits_rx) = watch::channel(limits);
    let service = Arc::new(BetService::new(
      store.clone(),
      Arc::clone(&writer),
      cache,
      limits_rx,
      metrics,
    ));
    Fixture {
      store,
      locks,
      writer,
      service,
      limits_tx,
    }
  }

  fn request(user: &str, amount: f64, choice: Choice) -> PlaceBetRequest {
    PlaceBetRequest {
      user_id: user.into(),
      topic_id: "t1".into(),
      amount,
      choice,
    }
  }

  async fn fund(f: &Fixture, user: &str, amount: Points) {
    f.writer
      .apply_delta(DeltaRequest::new(user, amount, LedgerEntryType::Reward))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_place_bet_debits_and_records() {
    let f = fixture(AdmissionConfig::default());
    f.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    fund(&f, "alice", 100).await;

    let placed = f.service.place_bet(request("alice", 30.0, Choice::Yes)).await.unwrap();
    assert_eq!(placed.amount, 30);
    assert_eq!(placed.balance_after, 70);

    let stats = f.service.pool_stats("t1").await.unwrap();
    assert_eq!(stats.yes_pool, 30);
    assert_eq!(stats.no_pool, 0);
  }

  #[tokio::test]
  async fn test_rejects_fractional_amount() {
    let f = fixture(AdmissionConfig::default());
    f.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    fund(&f, "alice", 100).await;

    let err = f.service.place_bet(request("alice", 2.5, Choice::Yes)).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_AMOUNT");
    assert_eq!(f.store.balance("alice").await.unwrap(), 100);
  }

  #[tokio::test]
  async fn test_rejects_closed_topic() {
    let f = fixture(AdmissionConfig::default());
    f.store.put_topic_status("t1", TopicStatus::Locked).await.unwrap();
    fund(&f, "alice", 100).await;

    let err = f.service.place_bet(request("alice", 10.0, Choice::No)).await.unwrap_err();
    assert!(matches!(err, BetError::TopicNotOpen { .. }));
  }

  #[tokio::test]
  async fn test_insufficient_balance_surfaces_ledger_error() {
    let f = fixture(AdmissionConfig::default());
    f.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    fund(&f, "bob", 5).await;

    let err = f.service.place_bet(request("bob", 10.0, Choice::No)).await.unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
  }

  #[tokio::test]
  async fn test_daily_cap_uses_todays_bets_and_hot_reloaded_limits() {
    let f = fixture(AdmissionConfig::default());
    f.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    fund(&f, "carol", 1_000).await;
    f.service.place_bet(request("carol", 80.0, Choice::Yes)).await.unwrap();

    f.limits_tx.send_replace(AdmissionConfig {
      daily_cap: Some(100),
      ..AdmissionConfig::default()
    });

    let err = f.service.place_bet(request("carol", 30.0, Choice::Yes)).await.unwrap_err();
    assert!(matches!(
      err,
      BetError::Admission(AdmissionRejection::DailyCapExceeded { committed: 80, cap: 100 })
    ));
    f.service.place_bet(request("carol", 20.0, Choice::Yes)).await.unwrap();
  }

  #[tokio::test]
  async fn test_bet_waiting_on_user_lock_is_refused_once_topic_locks() {
    let f = fixture(AdmissionConfig::default());
    f.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    fund(&f, "alice", 100).await;

    let held = f
      .locks
      .acquire(&user_key("alice"), Duration::from_millis(10))
      .await
      .unwrap();
    let service = Arc::clone(&f.service);
    let pending =
      tokio::spawn(async move { service.place_bet(request("alice", 40.0, Choice::Yes)).await });

    // The request passed the OPEN check and now waits for alice's lock.
    tokio::time::sleep(Duration::from_millis(50)).await;
    f.store.put_topic_status("t1", TopicStatus::Locked).await.unwrap();
    drop(held);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(
      err,
      BetError::TopicNotOpen {
        status: TopicStatus::Locked,
        ..
      }
    ));
    assert!(f.store.bets_for_topic("t1").await.unwrap().is_empty());
    assert_eq!(f.store.balance("alice").await.unwrap(), 100);
  }

  #[tokio::test]
  async fn test_concurrent_bets_respect_daily_cap() {
    let f = fixture(AdmissionConfig {
      daily_cap: Some(100),
      ..AdmissionConfig::default()
    });
    f.store.put_topic_status("t1", TopicStatus::Open).await.unwrap();
    fund(&f, "dora", 1_000).await;

    let attempts = (0..5).map(|_| {
      let service = Arc::clone(&f.service);
      tokio::spawn(async move { service.place_bet(request("dora", 60.0, Choice::No)).await })
    });
    let results = futures_util::future::join_all(attempts).await;

    let accepted = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    let capped = results
      .iter()
      .filter(|r| {
        matches!(
          r,
          Ok(Err(BetError::Admission(AdmissionRejection::DailyCapExceeded { .. })))
        )
      })
      .count();
    assert_eq!(accepted, 1);
    assert_eq!(capped, 4);
    assert_eq!(f.store.balance("dora").await.unwrap(), 940);
  }

  #[test]
  fn test_loss_streak_counts_leading_losses() {
    let mut loss = Bet::new("t".into(), "u".into(), Choice::Yes, 10);
    loss.settled = true;
    loss.payout_amount = Some(0);
    loss.settled_at = Some(Utc::now());
    let mut win = loss.clone();
    win.payout_amount = Some(20);

    let (streak, last) = loss_streak(&[loss.clone(), loss.clone(), win.clone(), loss.clone()]);
    assert_eq!(streak, 2);
    assert!(last.is_some());

    let (streak, last) = loss_streak(&[win, loss]);
    assert_eq!(streak, 0);
    assert!(last.is_none());
  }
}
