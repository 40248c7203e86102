//! In-Memory Ledger Store - Single-Node Transactional Store
//!
//! Implements the `LedgerStore` port on top of plain tables guarded by one
//! async mutex. Holding that mutex for the whole method is what makes each
//! port call a single atomic unit of work:
//! - balance CAS + ledger append + bet insert/flip commit together or not at all
//! - `(reference, entry_type)` uniqueness is enforced by an index rebuilt on load
//! - the settlement record insert flips the topic to RESOLVED in the same step
//!
//! Every committed mutation gets the next sequence number inside the lock
//! and is appended to the JSONL journal before the call returns. On
//! restart the store is rebuilt from the last snapshot plus every journal
//! record with a higher sequence number.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::journal::{JournalRecord, LedgerJournal, StoreEvent};
use crate::domain::types::{
    Bet, BetId, Choice, LedgerEntry, LedgerEntryType, LedgerRef, Points, Resolution,
    SettlementRecord, Topic, TopicId, TopicStatus, UserId,
};
use crate::ports::store::{
    BalanceMismatch, BetEffect, CommitOutcome, LedgerStore, LedgerWrite, WriteOutcome,
};

/// Every persisted table of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreTables {
    pub balances: HashMap<UserId, Points>,
    /// Append-only, in commit order.
    pub ledger: Vec<LedgerEntry>,
    pub bets: HashMap<BetId, Bet>,
    pub topics: HashMap<TopicId, Topic>,
    pub resolutions: HashMap<TopicId, Resolution>,
    pub settlements: HashMap<TopicId, SettlementRecord>,
    /// Sequence number of the last committed mutation.
    #[serde(default)]
    pub journal_seq: u64,
}

impl StoreTables {
    fn settle_bet(&mut self, bet_id: &str, payout: Points, at: DateTime<Utc>) {
        if let Some(bet) = self.bets.get_mut(bet_id) {
            bet.settled = true;
            bet.payout_amount = Some(payout);
            bet.settled_at = Some(at);
        }
    }

    fn apply_bet_effect(&mut self, effect: BetEffect, at: DateTime<Utc>) {
        match effect {
            BetEffect::Insert(bet) => {
                self.bets.insert(bet.id.clone(), bet);
            }
            BetEffect::Settle { bet_id, payout, .. } => self.settle_bet(&bet_id, payout, at),
        }
    }

    /// Re-apply a journaled mutation. Balances are set from the entry's
    /// `balance_after`, so replay does not depend on deltas before it.
    fn replay(&mut self, event: StoreEvent, at: DateTime<Utc>) {
        match event {
            StoreEvent::Entry { entry, bet_effect } => {
                self.balances.insert(entry.user_id.clone(), entry.balance_after);
                if let Some(effect) = bet_effect {
                    self.apply_bet_effect(effect, entry.created_at);
                }
                self.ledger.push(entry);
            }
            StoreEvent::TopicStatus { topic } => {
                self.topics.insert(topic.id.clone(), topic);
            }
            StoreEvent::Resolution { resolution } => {
                self.resolutions.insert(resolution.topic_id.clone(), resolution);
            }
            StoreEvent::BetSettled { bet_id, payout } => self.settle_bet(&bet_id, payout, at),
            StoreEvent::Settlement { record } => {
                if let Some(topic) = self.topics.get_mut(&record.topic_id) {
                    topic.status = TopicStatus::Resolved;
                    topic.updated_at = at;
                }
                self.settlements.insert(record.topic_id.clone(), record);
            }
        }
    }
}

struct Inner {
    tables: StoreTables,
    /// `(reference, entry_type)` -> position in `tables.ledger`.
    ref_index: HashMap<(LedgerRef, LedgerEntryType), usize>,
}

impl Inner {
    fn new(tables: StoreTables) -> Self {
        let ref_index = tables
            .ledger
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.reference.clone().map(|r| ((r, e.entry_type), i)))
            .collect();
        Self { tables, ref_index }
    }

    fn balance(&self, user_id: &str) -> Points {
        self.tables.balances.get(user_id).copied().unwrap_or(0)
    }

    /// Validate a bet effect without applying it; `Some` is the rejection.
    fn check_bet_effect(&self, effect: &BetEffect) -> Option<WriteOutcome> {
        match effect {
            BetEffect::Insert(bet) => {
                if self.tables.bets.contains_key(&bet.id) {
                    return Some(WriteOutcome::BetRejected);
                }
                match self.tables.topics.get(&bet.topic_id) {
                    Some(topic) if topic.status == TopicStatus::Open => None,
                    topic => Some(WriteOutcome::TopicClosed {
                        status: topic.map(|t| t.status),
                    }),
                }
            }
            BetEffect::Settle {
                bet_id,
                expected_amount,
                ..
            } => {
                let matches = self
                    .tables
                    .bets
                    .get(bet_id)
                    .is_some_and(|b| !b.settled && b.amount == *expected_amount);
                (!matches).then_some(WriteOutcome::BetRejected)
            }
        }
    }

    /// Assign the next sequence number to a committed mutation.
    fn stamp(&mut self, event: StoreEvent, at: DateTime<Utc>) -> JournalRecord {
        self.tables.journal_seq += 1;
        JournalRecord {
            seq: self.tables.journal_seq,
            at,
            event,
        }
    }
}

/// Mutex-guarded in-memory implementation of `LedgerStore`.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    journal: Option<Arc<LedgerJournal>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store without a journal.
    pub fn new() -> Self {
        Self::from_tables(StoreTables::default())
    }

    /// Rebuild a store from snapshot tables plus the journal records
    /// committed after the snapshot. `records` must be in sequence order.
    pub fn recover(mut tables: StoreTables, records: Vec<JournalRecord>) -> Self {
        let snapshot_seq = tables.journal_seq;
        let mut replayed = 0usize;
        for record in records {
            if record.seq <= tables.journal_seq {
                continue;
            }
            tables.journal_seq = record.seq;
            tables.replay(record.event, record.at);
            replayed += 1;
        }
        info!(
            snapshot_seq,
            journal_seq = tables.journal_seq,
            replayed,
            "Store recovered from snapshot and journal"
        );
        Self::from_tables(tables)
    }

    /// Rebuild a store from snapshot tables.
    pub fn from_tables(tables: StoreTables) -> Self {
        Self {
            inner: Mutex::new(Inner::new(tables)),
            journal: None,
        }
    }

    /// Mirror committed rows to an append-only journal.
    pub fn with_journal(mut self, journal: Arc<LedgerJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Consistent copy of every table, for snapshots.
    pub async fn snapshot(&self) -> StoreTables {
        self.inner.lock().await.tables.clone()
    }

    /// Overwrite a balance without a ledger entry (simulates drift).
    #[cfg(test)]
    pub async fn force_balance(&self, user_id: &str, balance: Points) {
        self.inner
            .lock()
            .await
            .tables
            .balances
            .insert(user_id.to_string(), balance);
    }

    /// Insert a bet row without touching balances or the journal.
    #[cfg(test)]
    pub async fn insert_bet(&self, bet: Bet) {
        self.inner.lock().await.tables.bets.insert(bet.id.clone(), bet);
    }

    async fn append_journal(&self, record: &JournalRecord) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(e) = journal.append(record).await {
            warn!(seq = record.seq, error = %e, "Failed to journal store mutation");
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn balance(&self, user_id: &str) -> anyhow::Result<Points> {
        Ok(self.inner.lock().await.balance(user_id))
    }

    async fn write_delta(&self, write: LedgerWrite) -> anyhow::Result<WriteOutcome> {
        let (entry, record) = {
            let mut inner = self.inner.lock().await;

            if let Some(rejection) = write
                .bet_effect
                .as_ref()
                .and_then(|effect| inner.check_bet_effect(effect))
            {
                return Ok(rejection);
            }

            if write.reference.as_ref().is_some_and(|reference| {
                inner
                    .ref_index
                    .contains_key(&(reference.clone(), write.entry_type))
            }) {
                return Ok(WriteOutcome::DuplicateReference);
            }

            let current = inner.balance(&write.user_id);
            if current != write.expected_balance {
                return Ok(WriteOutcome::BalanceChanged { current });
            }

            let Some(balance_after) = current.checked_add(write.amount) else {
                return Ok(WriteOutcome::AmountOverflow { balance: current });
            };
            if balance_after < 0 {
                return Ok(WriteOutcome::InsufficientBalance { balance: current });
            }

            let now = Utc::now();
            let entry = LedgerEntry {
                id: Uuid::new_v4(),
                user_id: write.user_id.clone(),
                entry_type: write.entry_type,
                amount: write.amount,
                balance_after,
                reference: write.reference.clone(),
                note: write.note,
                created_at: now,
            };

            inner.tables.balances.insert(write.user_id, balance_after);
            let position = inner.tables.ledger.len();
            inner.tables.ledger.push(entry.clone());
            if let Some(reference) = write.reference {
                inner.ref_index.insert((reference, write.entry_type), position);
            }
            if let Some(effect) = write.bet_effect.clone() {
                inner.tables.apply_bet_effect(effect, now);
            }
            let record = inner.stamp(
                StoreEvent::Entry {
                    entry: entry.clone(),
                    bet_effect: write.bet_effect,
                },
                now,
            );

            (entry, record)
        };

        debug!(
            user_id = %entry.user_id,
            entry_type = %entry.entry_type,
            amount = entry.amount,
            balance_after = entry.balance_after,
            "Ledger entry committed"
        );
        self.append_journal(&record).await;
        Ok(WriteOutcome::Applied(entry))
    }

    async fn find_entry(
        &self,
        reference: &LedgerRef,
        entry_type: LedgerEntryType,
    ) -> anyhow::Result<Option<LedgerEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ref_index
            .get(&(reference.clone(), entry_type))
            .and_then(|&i| inner.tables.ledger.get(i))
            .cloned())
    }

    async fn entries_for_user(&self, user_id: &str) -> anyhow::Result<Vec<LedgerEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn reconcile(&self) -> anyhow::Result<Vec<BalanceMismatch>> {
        let inner = self.inner.lock().await;

        let mut sums: HashMap<&str, Points> = HashMap::new();
        for entry in &inner.tables.ledger {
            let sum = sums.entry(entry.user_id.as_str()).or_default();
            *sum = sum.saturating_add(entry.amount);
        }

        let mut mismatches: Vec<BalanceMismatch> = inner
            .tables
            .balances
            .iter()
            .filter_map(|(user_id, &balance)| {
                let ledger_sum = sums.get(user_id.as_str()).copied().unwrap_or(0);
                (balance != ledger_sum).then(|| BalanceMismatch {
                    user_id: user_id.clone(),
                    balance,
                    ledger_sum,
                })
            })
            .collect();

        // Entries for users that have no balance row at all.
        for (user_id, &ledger_sum) in &sums {
            if ledger_sum != 0 && !inner.tables.balances.contains_key(*user_id) {
                mismatches.push(BalanceMismatch {
                    user_id: (*user_id).to_string(),
                    balance: 0,
                    ledger_sum,
                });
            }
        }

        mismatches.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(mismatches)
    }

    async fn topic(&self, topic_id: &str) -> anyhow::Result<Option<Topic>> {
        Ok(self.inner.lock().await.tables.topics.get(topic_id).cloned())
    }

    async fn put_topic_status(&self, topic_id: &str, status: TopicStatus) -> anyhow::Result<Topic> {
        let now = Utc::now();
        let topic = Topic {
            id: topic_id.to_string(),
            status,
            updated_at: now,
        };
        let record = {
            let mut inner = self.inner.lock().await;
            inner.tables.topics.insert(topic_id.to_string(), topic.clone());
            inner.stamp(StoreEvent::TopicStatus { topic: topic.clone() }, now)
        };
        self.append_journal(&record).await;
        Ok(topic)
    }

    async fn resolution(&self, topic_id: &str) -> anyhow::Result<Option<Resolution>> {
        Ok(self
            .inner
            .lock()
            .await
            .tables
            .resolutions
            .get(topic_id)
            .cloned())
    }

    async fn upsert_resolution(&self, resolution: Resolution) -> anyhow::Result<bool> {
        let record = {
            let mut inner = self.inner.lock().await;
            if inner.tables.settlements.contains_key(&resolution.topic_id) {
                return Ok(false);
            }
            inner
                .tables
                .resolutions
                .insert(resolution.topic_id.clone(), resolution.clone());
            inner.stamp(StoreEvent::Resolution { resolution }, Utc::now())
        };
        self.append_journal(&record).await;
        Ok(true)
    }

    async fn bets_for_topic(&self, topic_id: &str) -> anyhow::Result<Vec<Bet>> {
        let inner = self.inner.lock().await;
        let mut bets: Vec<Bet> = inner
            .tables
            .bets
            .values()
            .filter(|b| b.topic_id == topic_id)
            .cloned()
            .collect();
        bets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(bets)
    }

    async fn mark_bet_settled(
        &self,
        bet_id: &str,
        expected_amount: Points,
        payout: Points,
    ) -> anyhow::Result<bool> {
        let record = {
            let mut inner = self.inner.lock().await;
            let effect = BetEffect::Settle {
                bet_id: bet_id.to_string(),
                expected_amount,
                payout,
            };
            if inner.check_bet_effect(&effect).is_some() {
                return Ok(false);
            }
            let now = Utc::now();
            inner.tables.settle_bet(bet_id, payout, now);
            inner.stamp(
                StoreEvent::BetSettled {
                    bet_id: bet_id.to_string(),
                    payout,
                },
                now,
            )
        };
        self.append_journal(&record).await;
        Ok(true)
    }

    async fn topic_pools(&self, topic_id: &str) -> anyhow::Result<(Points, Points)> {
        let inner = self.inner.lock().await;
        let (mut yes, mut no) = (0, 0);
        for bet in inner.tables.bets.values().filter(|b| b.topic_id == topic_id) {
            match bet.choice {
                Choice::Yes => yes = bet.amount.saturating_add(yes),
                Choice::No => no = bet.amount.saturating_add(no),
            }
        }
        Ok((yes, no))
    }

    async fn user_topic_stake(&self, user_id: &str, topic_id: &str) -> anyhow::Result<Points> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .bets
            .values()
            .filter(|b| b.user_id == user_id && b.topic_id == topic_id)
            .fold(0, |sum: Points, b| sum.saturating_add(b.amount)))
    }

    async fn committed_since(&self, user_id: &str, since: DateTime<Utc>) -> anyhow::Result<Points> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .bets
            .values()
            .filter(|b| b.user_id == user_id && b.created_at >= since)
            .fold(0, |sum: Points, b| sum.saturating_add(b.amount)))
    }

    async fn recent_settled_bets(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Bet>> {
        let inner = self.inner.lock().await;
        let mut bets: Vec<Bet> = inner
            .tables
            .bets
            .values()
            .filter(|b| b.user_id == user_id && b.settled)
            .cloned()
            .collect();
        bets.sort_by(|a, b| b.settled_at.cmp(&a.settled_at));
        bets.truncate(limit);
        Ok(bets)
    }

    async fn settlement(&self, topic_id: &str) -> anyhow::Result<Option<SettlementRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .tables
            .settlements
            .get(topic_id)
            .cloned())
    }

    async fn commit_settlement(&self, record: SettlementRecord) -> anyhow::Result<CommitOutcome> {
        let journaled = {
            let mut inner = self.inner.lock().await;
            if inner.tables.settlements.contains_key(&record.topic_id) {
                return Ok(CommitOutcome::AlreadyExists);
            }
            let now = Utc::now();
            match inner.tables.topics.get_mut(&record.topic_id) {
                Some(topic) if topic.status == TopicStatus::Locked => {
                    topic.status = TopicStatus::Resolved;
                    topic.updated_at = now;
                }
                _ => return Ok(CommitOutcome::TopicNotLocked),
            }
            inner
                .tables
                .settlements
                .insert(record.topic_id.clone(), record.clone());
            inner.stamp(StoreEvent::Settlement { record }, now)
        };

        self.append_journal(&journaled).await;
        Ok(CommitOutcome::Committed)
    }

    async fn pending_settlements(&self, limit: usize) -> anyhow::Result<Vec<TopicId>> {
        let inner = self.inner.lock().await;
        let mut topics: Vec<&Topic> = inner
            .tables
            .topics
            .values()
            .filter(|t| {
                t.status == TopicStatus::Locked
                    && inner.tables.resolutions.contains_key(&t.id)
                    && !inner.tables.settlements.contains_key(&t.id)
            })
            .collect();
        topics.sort_by_key(|t| t.updated_at);
        Ok(topics.into_iter().take(limit).map(|t| t.id.clone()).collect())
    }

    async fn pending_refunds(&self, limit: usize) -> anyhow::Result<Vec<TopicId>> {
        let inner = self.inner.lock().await;
        let mut topics: Vec<&Topic> = inner
            .tables
            .topics
            .values()
            .filter(|t| {
                t.status == TopicStatus::Canceled
                    && inner
                        .tables
                        .bets
                        .values()
                        .any(|b| b.topic_id == t.id && !b.settled)
            })
            .collect();
        topics.sort_by_key(|t| t.updated_at);
        Ok(topics.into_iter().take(limit).map(|t| t.id.clone()).collect())
    }

    async fn is_healthy(&self) -> bool {
        match &self.journal {
            Some(journal) => journal.is_healthy().await,
            None => true,
        }
    }
}
