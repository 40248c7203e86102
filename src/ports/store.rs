//! Ledger Store Port - Transactional Persistence Interface
//!
//! The relational store the engine relies on: balances, the append-only
//! ledger, bets, topic mirrors, resolutions and settlement records.
//!
//! Every method is one atomic unit of work. Conditional writes report
//! "zero rows affected" through outcome enums instead of errors, so use
//! cases decide whether a miss is a race, a duplicate or a violation.
//! Infrastructure failures surface as `anyhow::Error`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::{
  Bet, BetId, LedgerEntry, LedgerEntryType, LedgerRef, Points, Resolution, SettlementRecord,
  Topic, TopicId, TopicStatus, UserId,
};

/// Bet row change that commits together with a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum BetEffect {
  /// Insert a freshly placed bet (stake debit). Only applies while the
  /// bet's topic is OPEN.
  Insert(Bet),
  /// Flip `settled` false -> true, guarded by the expected stake.
  Settle {
    bet_id: BetId,
    expected_amount: Points,
    payout: Points,
  },
}

/// One ledger write: balance CAS + entry append (+ optional bet effect).
#[derive(Debug, Clone)]
pub struct LedgerWrite {
  pub user_id: UserId,
  pub amount: Points,
  pub entry_type: LedgerEntryType,
  pub reference: Option<LedgerRef>,
  pub note: Option<String>,
  /// Balance observed by the writer; the update applies only if unchanged.
  pub expected_balance: Points,
  pub bet_effect: Option<BetEffect>,
}

/// Result of a conditional ledger write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
  /// Balance updated and entry appended.
  Applied(LedgerEntry),
  /// `(reference, entry_type)` already exists; nothing written.
  DuplicateReference,
  /// Balance differed from `expected_balance`; nothing written.
  BalanceChanged { current: Points },
  /// The write would drive the balance negative; nothing written.
  InsufficientBalance { balance: Points },
  /// The new balance does not fit in `Points`; nothing written.
  AmountOverflow { balance: Points },
  /// A bet insert targeted a topic that is not OPEN (`None` when the
  /// topic is unknown); nothing written.
  TopicClosed { status: Option<TopicStatus> },
  /// The bet effect did not match (already settled, amount changed,
  /// missing or duplicate id); nothing written.
  BetRejected,
}

/// Result of the settlement commit point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
  /// Record inserted and topic flipped to RESOLVED.
  Committed,
  /// A record already exists for the topic.
  AlreadyExists,
  /// Topic left LOCKED before the commit.
  TopicNotLocked,
}

/// Balance that disagrees with its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
  pub user_id: UserId,
  pub balance: Points,
  pub ledger_sum: Points,
}

/// Trait for transactional store providers.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
  // ── Balances & ledger ─────────────────────────────────

  /// Current balance (0 for unknown users).
  async fn balance(&self, user_id: &str) -> anyhow::Result<Points>;

  /// Apply one ledger write atomically.
  async fn write_delta(&self, write: LedgerWrite) -> anyhow::Result<WriteOutcome>;

  /// Entry for a `(reference, entry_type)` pair, if recorded.
  async fn find_entry(
    &self,
    reference: &LedgerRef,
    entry_type: LedgerEntryType,
  ) -> anyhow::Result<Option<LedgerEntry>>;

  /// All entries of one user in commit order.
  async fn entries_for_user(&self, user_id: &str) -> anyhow::Result<Vec<LedgerEntry>>;

  /// Users whose balance differs from the sum of their ledger entries.
  async fn reconcile(&self) -> anyhow::Result<Vec<BalanceMismatch>>;

  // ── Topics & resolutions ──────────────────────────────

  async fn topic(&self, topic_id: &str) -> anyhow::Result<Option<Topic>>;

  /// Upsert the mirrored topic status.
  async fn put_topic_status(&self, topic_id: &str, status: TopicStatus) -> anyhow::Result<Topic>;

  async fn resolution(&self, topic_id: &str) -> anyhow::Result<Option<Resolution>>;

  /// Insert or replace the resolution; returns `false` (no change) once
  /// a settlement record exists.
  async fn upsert_resolution(&self, resolution: Resolution) -> anyhow::Result<bool>;

  // ── Bets ──────────────────────────────────────────────

  async fn bets_for_topic(&self, topic_id: &str) -> anyhow::Result<Vec<Bet>>;

  /// Flip a bet to settled without a ledger entry (zero payout).
  /// Returns `false` when zero rows matched.
  async fn mark_bet_settled(
    &self,
    bet_id: &str,
    expected_amount: Points,
    payout: Points,
  ) -> anyhow::Result<bool>;

  /// `(yes_pool, no_pool)` aggregated from bets.
  async fn topic_pools(&self, topic_id: &str) -> anyhow::Result<(Points, Points)>;

  /// The user's total stake in a topic.
  async fn user_topic_stake(&self, user_id: &str, topic_id: &str) -> anyhow::Result<Points>;

  /// Sum of the user's stakes placed at or after `since`.
  async fn committed_since(&self, user_id: &str, since: DateTime<Utc>) -> anyhow::Result<Points>;

  /// Most recently settled bets of a user, newest first.
  async fn recent_settled_bets(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Bet>>;

  // ── Settlement ────────────────────────────────────────

  async fn settlement(&self, topic_id: &str) -> anyhow::Result<Option<SettlementRecord>>;

  /// Insert the settlement record and flip the topic LOCKED -> RESOLVED.
  async fn commit_settlement(&self, record: SettlementRecord) -> anyhow::Result<CommitOutcome>;

  /// LOCKED topics with a resolution and no settlement record.
  async fn pending_settlements(&self, limit: usize) -> anyhow::Result<Vec<TopicId>>;

  /// CANCELED topics that still have unsettled bets.
  async fn pending_refunds(&self, limit: usize) -> anyhow::Result<Vec<TopicId>>;

  /// Check if the store is usable.
  async fn is_healthy(&self) -> bool;
}
