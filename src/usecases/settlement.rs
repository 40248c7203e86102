//! Settlement Use Case - Pari-Mutuel Payout of Resolved Topics
//!
//! Drives a LOCKED, resolved topic to RESOLVED by crediting every winning
//! bet exactly once, then persisting the immutable settlement record.
//! The same driver refunds every stake of a CANCELED topic.
//!
//! Settlement flow (under the `topic:<id>` lock):
//! 1. Check preconditions (topic, record, status, resolution)
//! 2. Recompute payouts from the stored bets and verify integrity
//! 3. Verify already-settled bets against the recomputation (resume)
//! 4. Credit and flip each unsettled bet in its own atomic unit
//! 5. Insert the settlement record and flip LOCKED -> RESOLVED (commit point)
//!
//! A crash anywhere before step 5 leaves a resumable topic: re-running
//! skips settled bets after verifying them and finishes the rest.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::ledger_writer::LedgerWriter;
use crate::adapters::metrics::ServiceMetrics;
use crate::domain::errors::{LedgerError, SettlementError};
use crate::domain::fees::FeeSchedule;
use crate::domain::payout::{StakeInput, calculate_settlement_with_fee};
use crate::domain::types::{
  Bet, LedgerEntryType, LedgerRef, Points, SettlementRecord, TopicId, TopicStatus,
};
use crate::ports::lock::{LockManager, topic_key, with_exclusive};
use crate::ports::store::{CommitOutcome, LedgerStore};

/// Refund totals of one canceled topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundSummary {
  pub topic_id: TopicId,
  /// Bets refunded by this run.
  pub refunded_count: usize,
  /// Points returned by this run.
  pub refunded_points: Points,
}

/// Successful (or no-op) result of a settlement run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementOutcome {
  /// Record committed by this run.
  Settled(SettlementRecord),
  /// Canceled topic refunded by this run.
  Refunded(RefundSummary),
  /// Another worker holds the topic lock.
  AlreadyInProgress,
}

/// Per-topic settlement driver.
pub struct SettlementOrchestrator {
  store: Arc<dyn LedgerStore>,
  locks: Arc<dyn LockManager>,
  writer: Arc<LedgerWriter>,
  fees: FeeSchedule,
  /// Maximum wait for the topic lock.
  lock_wait: Duration,
  metrics: Arc<ServiceMetrics>,
}

impl SettlementOrchestrator {
  pub fn new(
    store: Arc<dyn LedgerStore>,
    locks: Arc<dyn LockManager>,
    writer: Arc<LedgerWriter>,
    fees: FeeSchedule,
    lock_wait: Duration,
    metrics: Arc<ServiceMetrics>,
  ) -> Self {
    Self {
      store,
      locks,
      writer,
      fees,
      lock_wait,
      metrics,
    }
  }

  /// Settle a LOCKED, resolved topic.
  #[instrument(skip(self))]
  pub async fn settle_topic(
    &self,
    topic_id: &str,
    settled_by_id: &str,
  ) -> Result<SettlementOutcome, SettlementError> {
    let started = Instant::now();
    let result = with_exclusive(self.locks.as_ref(), &topic_key(topic_id), self.lock_wait, || {
      self.settle_locked(topic_id, settled_by_id)
    })
    .await;

    let result = match result {
      Ok(Some(record)) => Ok(SettlementOutcome::Settled(record)),
      Ok(None) => {
        info!(topic_id, "Settlement already in progress elsewhere, skipping");
        Ok(SettlementOutcome::AlreadyInProgress)
      }
      Err(e) => Err(e),
    };
    self.observe("settle", topic_id, started, &result);
    result
  }

  /// Refund every unsettled bet of a CANCELED topic.
  #[instrument(skip(self))]
  pub async fn refund_canceled_topic(
    &self,
    topic_id: &str,
  ) -> Result<SettlementOutcome, SettlementError> {
    let started = Instant::now();
    let result = with_exclusive(self.locks.as_ref(), &topic_key(topic_id), self.lock_wait, || {
      self.refund_locked(topic_id)
    })
    .await;

    let result = match result {
      Ok(Some(summary)) => Ok(SettlementOutcome::Refunded(summary)),
      Ok(None) => {
        info!(topic_id, "Refund already in progress elsewhere, skipping");
        Ok(SettlementOutcome::AlreadyInProgress)
      }
      Err(e) => Err(e),
    };
    self.observe("refund", topic_id, started, &result);
    result
  }

  // ── Settlement ─────────────────────────────────────────

  async fn settle_locked(
    &self,
    topic_id: &str,
    settled_by_id: &str,
  ) -> Result<SettlementRecord, SettlementError> {
    let topic = self
      .store
      .topic(topic_id)
      .await?
      .ok_or_else(|| SettlementError::TopicNotFound(topic_id.to_string()))?;

    if self.store.settlement(topic_id).await?.is_some() {
      return Err(SettlementError::AlreadySettled(topic_id.to_string()));
    }
    if topic.status != TopicStatus::Locked {
      return Err(SettlementError::TopicNotLockedForSettlement {
        topic_id: topic_id.to_string(),
        status: topic.status,
        expected: TopicStatus::Locked,
      });
    }
    let resolution = self
      .store
      .resolution(topic_id)
      .await?
      .ok_or_else(|| SettlementError::ResolutionMissing(topic_id.to_string()))?;

    let bets = self.store.bets_for_topic(topic_id).await?;
    ensure_unique_ids(topic_id, &bets)?;

    let stakes: Vec<StakeInput> = bets
      .iter()
      .map(|b| StakeInput::new(b.id.clone(), b.user_id.clone(), b.choice, b.amount))
      .collect();
    let calc = calculate_settlement_with_fee(&stakes, resolution.result, self.fees);
    let summary = &calc.summary;

    if summary.invalid_amount_count > 0 {
      return Err(SettlementError::InvalidBetAmountDetected {
        topic_id: topic_id.to_string(),
        count: summary.invalid_amount_count,
      });
    }
    let recomputed = calc.payout_sum();
    if recomputed != summary.payout_total {
      return Err(SettlementError::PayoutIntegrityViolation {
        topic_id: topic_id.to_string(),
        expected: summary.payout_total,
        actual: recomputed,
      });
    }

    let payouts = calc.payouts_by_id();
    let payout_of = |bet: &Bet| payouts.get(bet.id.as_str()).copied().unwrap_or(0);

    // Resume: every bet flipped by an earlier run must match this run.
    let mut applied: Points = 0;
    for bet in bets.iter().filter(|b| b.settled) {
      let expected = payout_of(bet);
      self
        .verify_settled_bet(bet, expected, LedgerEntryType::BetSettle)
        .await?;
      applied += expected;
    }

    if bets.iter().any(|b| b.settled) {
      info!(topic_id, resumed_points = applied, "Resuming partial settlement");
    }

    for bet in bets.iter().filter(|b| !b.settled) {
      let payout = payout_of(bet);
      self.settle_one(topic_id, bet, payout, LedgerEntryType::BetSettle).await?;
      applied += payout;
    }

    if applied != summary.payout_total {
      return Err(SettlementError::PayoutIntegrityViolation {
        topic_id: topic_id.to_string(),
        expected: summary.payout_total,
        actual: applied,
      });
    }

    let record = SettlementRecord {
      topic_id: topic_id.to_string(),
      result: resolution.result,
      total_pool: summary.total_pool,
      fee_rate: self.fees.rate().to_string(),
      fee_collected: summary.fee_collected,
      net_pool: summary.net_pool,
      payout_total: summary.payout_total,
      winner_count: summary.winner_count,
      settled_by_id: settled_by_id.to_string(),
      settled_at: Utc::now(),
    };

    match self.store.commit_settlement(record.clone()).await? {
      CommitOutcome::Committed => {
        self
          .metrics
          .payout_points
          .inc_by(u64::try_from(record.payout_total).unwrap_or(0));
        info!(
          topic_id,
          result = %record.result,
          total_pool = record.total_pool,
          payout_total = record.payout_total,
          fee_collected = record.fee_collected,
          winner_count = record.winner_count,
          "Topic settled"
        );
        Ok(record)
      }
      CommitOutcome::AlreadyExists => Err(SettlementError::DuplicateSettlementTxDetected {
        topic_id: topic_id.to_string(),
        detail: "settlement record inserted concurrently".to_string(),
      }),
      CommitOutcome::TopicNotLocked => {
        let status = self
          .store
          .topic(topic_id)
          .await?
          .map_or(TopicStatus::Locked, |t| t.status);
        Err(SettlementError::TopicNotLockedForSettlement {
          topic_id: topic_id.to_string(),
          status,
          expected: TopicStatus::Locked,
        })
      }
    }
  }

  // ── Refunds ────────────────────────────────────────────

  async fn refund_locked(&self, topic_id: &str) -> Result<RefundSummary, SettlementError> {
    let topic = self
      .store
      .topic(topic_id)
      .await?
      .ok_or_else(|| SettlementError::TopicNotFound(topic_id.to_string()))?;

    if topic.status != TopicStatus::Canceled {
      return Err(SettlementError::TopicNotLockedForSettlement {
        topic_id: topic_id.to_string(),
        status: topic.status,
        expected: TopicStatus::Canceled,
      });
    }

    let bets = self.store.bets_for_topic(topic_id).await?;
    ensure_unique_ids(topic_id, &bets)?;

    let invalid = bets.iter().filter(|b| b.amount <= 0).count();
    if invalid > 0 {
      return Err(SettlementError::InvalidBetAmountDetected {
        topic_id: topic_id.to_string(),
        count: invalid,
      });
    }

    for bet in bets.iter().filter(|b| b.settled) {
      self
        .verify_settled_bet(bet, bet.amount, LedgerEntryType::BetRefund)
        .await?;
    }

    let mut summary = RefundSummary {
      topic_id: topic_id.to_string(),
      refunded_count: 0,
      refunded_points: 0,
    };
    for bet in bets.iter().filter(|b| !b.settled) {
      self
        .settle_one(topic_id, bet, bet.amount, LedgerEntryType::BetRefund)
        .await?;
      summary.refunded_count += 1;
      summary.refunded_points += bet.amount;
    }

    info!(
      topic_id,
      refunded = summary.refunded_count,
      points = summary.refunded_points,
      "Canceled topic refunded"
    );
    Ok(summary)
  }

  // ── Shared steps ───────────────────────────────────────

  /// Flip one unsettled bet, crediting `payout` when it is positive.
  async fn settle_one(
    &self,
    topic_id: &str,
    bet: &Bet,
    payout: Points,
    entry_type: LedgerEntryType,
  ) -> Result<(), SettlementError> {
    if payout <= 0 {
      let flipped = self.store.mark_bet_settled(&bet.id, bet.amount, 0).await?;
      if !flipped {
        return Err(SettlementError::BetAlreadySettledRace {
          bet_id: bet.id.clone(),
        });
      }
      return Ok(());
    }

    match self.writer.credit_bet(bet, payout, entry_type).await {
      Ok(_) => Ok(()),
      Err(LedgerError::BetSettleRejected { bet_id }) => {
        Err(SettlementError::BetAlreadySettledRace { bet_id })
      }
      Err(LedgerError::DuplicateReference { .. }) => {
        Err(SettlementError::DuplicateSettlementTxDetected {
          topic_id: topic_id.to_string(),
          detail: format!("{entry_type} already recorded for unsettled bet {}", bet.id),
        })
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Check a previously settled bet against the recomputed payout and
  /// its ledger credit.
  async fn verify_settled_bet(
    &self,
    bet: &Bet,
    expected: Points,
    entry_type: LedgerEntryType,
  ) -> Result<(), SettlementError> {
    if bet.payout_amount != Some(expected) {
      return Err(SettlementError::PartialSettlementMismatch {
        bet_id: bet.id.clone(),
        detail: format!(
          "stored payout {:?}, recomputed {expected}",
          bet.payout_amount
        ),
      });
    }

    let entry = self
      .store
      .find_entry(&LedgerRef::Bet(bet.id.clone()), entry_type)
      .await?;
    let detail = match (expected > 0, entry) {
      (true, None) => Some(format!("missing {entry_type} entry")),
      (false, Some(_)) => Some(format!("unexpected {entry_type} entry for zero payout")),
      (true, Some(e)) if e.amount != expected => Some(format!(
        "{entry_type} entry credited {}, expected {expected}",
        e.amount
      )),
      _ => None,
    };

    match detail {
      Some(detail) => Err(SettlementError::PartialSettlementMismatch {
        bet_id: bet.id.clone(),
        detail,
      }),
      None => Ok(()),
    }
  }

  fn observe(
    &self,
    kind: &str,
    topic_id: &str,
    started: Instant,
    result: &Result<SettlementOutcome, SettlementError>,
  ) {
    let outcome = match result {
      Ok(SettlementOutcome::AlreadyInProgress) => "in_progress",
      Ok(_) => "ok",
      Err(e) => e.code(),
    };
    self
      .metrics
      .settlement_runs
      .with_label_values(&[kind, outcome])
      .inc();
    #[allow(clippy::cast_precision_loss)]
    let elapsed_ms = started.elapsed().as_millis() as f64;
    self
      .metrics
      .settlement_latency_ms
      .with_label_values(&[kind])
      .observe(elapsed_ms);

    if let Err(e) = result {
      if e.is_integrity_violation() {
        error!(topic_id, code = e.code(), error = %e, "Settlement integrity violation");
      } else {
        warn!(topic_id, code = e.code(), error = %e, "Settlement run failed");
      }
    }
  }
}

fn ensure_unique_ids(topic_id: &str, bets: &[Bet]) -> Result<(), SettlementError> {
  let mut seen = HashSet::with_capacity(bets.len());
  for bet in bets {
    if !seen.insert(bet.id.as_str()) {
      return Err(SettlementError::DuplicateBetIdDetected {
        topic_id: topic_id.to_string(),
        bet_id: bet.id.clone(),
      });
    }
  }
  Ok(())
}
