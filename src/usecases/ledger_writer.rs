//! Ledger Writer Use Case - Serialized Balance Mutations
//!
//! The only path through which balances change. Each delta runs inside the
//! user's exclusive section and commits through one conditional store write:
//! 1. Validate the request (non-zero amount, user present)
//! 2. Acquire `user:<id>` with a bounded wait
//! 3. Read the balance and reject overdrafts up front
//! 4. Write balance CAS + ledger entry (+ bet effect) atomically
//! 5. Map "zero rows" outcomes to typed errors
//!
//! Stake placement runs the caller's admission check inside step 2, so the
//! limits are evaluated against the same committed state the debit sees.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::adapters::metrics::ServiceMetrics;
use crate::domain::errors::LedgerError;
use crate::domain::types::{Bet, LedgerEntry, LedgerEntryType, LedgerRef, Points, UserId};
use crate::ports::lock::{LockManager, user_key, with_exclusive};
use crate::ports::store::{BetEffect, LedgerStore, LedgerWrite, WriteOutcome};

/// A requested balance change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRequest {
  pub user_id: UserId,
  /// Signed, non-zero.
  pub amount: Points,
  pub entry_type: LedgerEntryType,
  pub reference: Option<LedgerRef>,
  pub note: Option<String>,
}

impl DeltaRequest {
  pub fn new(user_id: impl Into<UserId>, amount: Points, entry_type: LedgerEntryType) -> Self {
    Self {
      user_id: user_id.into(),
      amount,
      entry_type,
      reference: None,
      note: None,
    }
  }

  pub fn with_reference(mut self, reference: LedgerRef) -> Self {
    self.reference = Some(reference);
    self
  }

  pub fn with_note(mut self, note: impl Into<String>) -> Self {
    self.note = Some(note.into());
    self
  }
}

/// Committed delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDelta {
  pub balance_after: Points,
  pub entry: LedgerEntry,
}

/// Applies ledger deltas under per-user serialization.
pub struct LedgerWriter {
  store: Arc<dyn LedgerStore>,
  locks: Arc<dyn LockManager>,
  /// Maximum wait for the user lock.
  lock_wait: Duration,
  metrics: Arc<ServiceMetrics>,
}

impl LedgerWriter {
  pub fn new(
    store: Arc<dyn LedgerStore>,
    locks: Arc<dyn LockManager>,
    lock_wait: Duration,
    metrics: Arc<ServiceMetrics>,
  ) -> Self {
    Self {
      store,
      locks,
      lock_wait,
      metrics,
    }
  }

  /// Adjust a balance and append one ledger entry.
  #[instrument(
    skip(self, request),
    fields(user_id = %request.user_id, entry_type = %request.entry_type, amount = request.amount)
  )]
  pub async fn apply_delta(&self, request: DeltaRequest) -> Result<AppliedDelta, LedgerError> {
    self.apply(request, None).await
  }

  /// Debit a stake and insert the bet in the same unit.
  ///
  /// `admit` runs with `user:<id>` held and yields the bet to place (or the
  /// caller's rejection). Nothing is written when it fails.
  pub async fn place_stake<F, Fut, E>(&self, user_id: &str, admit: F) -> Result<AppliedDelta, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Bet, E>>,
    E: From<LedgerError> + From<anyhow::Error>,
  {
    if user_id.trim().is_empty() {
      return Err(LedgerError::MissingUser.into());
    }

    let key = user_key(user_id);
    let result = with_exclusive(self.locks.as_ref(), &key, self.lock_wait, || async {
      let bet = admit().await?;
      let written = if bet.user_id == user_id && bet.amount > 0 {
        let request =
          DeltaRequest::new(bet.user_id.clone(), -bet.amount, LedgerEntryType::BetPlace)
            .with_reference(LedgerRef::Bet(bet.id.clone()));
        self.write_locked(request, Some(BetEffect::Insert(bet))).await
      } else if bet.amount > 0 {
        Err(LedgerError::MissingUser)
      } else {
        Err(LedgerError::ZeroAmount)
      };
      self.record_write(LedgerEntryType::BetPlace, &written);
      written.map_err(E::from)
    })
    .await;

    match result {
      Ok(Some(applied)) => Ok(applied),
      Ok(None) => {
        warn!(user_id, "Timed out waiting for user ledger lock");
        let err = Err(LedgerError::LockTimeout {
          user_id: user_id.to_string(),
        });
        self.record_write(LedgerEntryType::BetPlace, &err);
        err.map_err(E::from)
      }
      Err(e) => Err(e),
    }
  }

  /// Credit `payout` for a bet and flip it settled in the same unit.
  ///
  /// `entry_type` is `BetSettle` for payouts and `BetRefund` for
  /// cancellation refunds.
  pub async fn credit_bet(
    &self,
    bet: &Bet,
    payout: Points,
    entry_type: LedgerEntryType,
  ) -> Result<AppliedDelta, LedgerError> {
    let request = DeltaRequest::new(bet.user_id.clone(), payout, entry_type)
      .with_reference(LedgerRef::Bet(bet.id.clone()));
    let effect = BetEffect::Settle {
      bet_id: bet.id.clone(),
      expected_amount: bet.amount,
      payout,
    };
    self.apply(request, Some(effect)).await
  }

  /// Current balance of a user (0 if unknown).
  pub async fn balance(&self, user_id: &str) -> Result<Points, LedgerError> {
    Ok(self.store.balance(user_id).await?)
  }

  async fn apply(
    &self,
    request: DeltaRequest,
    effect: Option<BetEffect>,
  ) -> Result<AppliedDelta, LedgerError> {
    if request.user_id.trim().is_empty() {
      return Err(LedgerError::MissingUser);
    }
    if request.amount == 0 {
      return Err(LedgerError::ZeroAmount);
    }

    let entry_type = request.entry_type;
    let user_id = request.user_id.clone();
    let key = user_key(&user_id);

    let result = with_exclusive(self.locks.as_ref(), &key, self.lock_wait, || {
      self.write_locked(request, effect)
    })
    .await;

    let result = match result {
      Ok(Some(applied)) => Ok(applied),
      Ok(None) => {
        warn!(user_id = %user_id, "Timed out waiting for user ledger lock");
        Err(LedgerError::LockTimeout { user_id })
      }
      Err(e) => Err(e),
    };

    self.record_write(entry_type, &result);
    result
  }

  fn record_write(&self, entry_type: LedgerEntryType, result: &Result<AppliedDelta, LedgerError>) {
    let outcome = match result {
      Ok(_) => "applied",
      Err(e) => e.code(),
    };
    self
      .metrics
      .ledger_writes
      .with_label_values(&[entry_type.as_str(), outcome])
      .inc();
  }

  /// Balance check and conditional write; runs with the user lock held.
  async fn write_locked(
    &self,
    request: DeltaRequest,
    effect: Option<BetEffect>,
  ) -> Result<AppliedDelta, LedgerError> {
    let balance = self.store.balance(&request.user_id).await?;

    if request.amount < 0 {
      let requested = request.amount.saturating_neg();
      if balance < requested {
        return Err(LedgerError::InsufficientBalance {
          user_id: request.user_id,
          balance,
          requested,
        });
      }
    }

    let (bet_id, topic_id) = match &effect {
      Some(BetEffect::Insert(bet)) => (Some(bet.id.clone()), Some(bet.topic_id.clone())),
      Some(BetEffect::Settle { bet_id, .. }) => (Some(bet_id.clone()), None),
      None => (None, None),
    };
    let reference = request.reference.clone();
    let user_id = request.user_id.clone();

    let write = LedgerWrite {
      user_id: request.user_id,
      amount: request.amount,
      entry_type: request.entry_type,
      reference: request.reference,
      note: request.note,
      expected_balance: balance,
      bet_effect: effect,
    };

    match self.store.write_delta(write).await? {
      WriteOutcome::Applied(entry) => {
        debug!(
          user_id = %entry.user_id,
          balance_after = entry.balance_after,
          "Ledger delta applied"
        );
        Ok(AppliedDelta {
          balance_after: entry.balance_after,
          entry,
        })
      }
      WriteOutcome::DuplicateReference => match reference {
        Some(reference) => Err(LedgerError::DuplicateReference {
          reference,
          entry_type: request.entry_type,
        }),
        None => Err(LedgerError::Store(anyhow::anyhow!(
          "store reported a duplicate for an unreferenced write"
        ))),
      },
      WriteOutcome::BalanceChanged { current } => {
        warn!(user_id = %user_id, observed = balance, current, "Balance changed under CAS");
        Err(LedgerError::ConcurrentWriteRace { user_id })
      }
      WriteOutcome::InsufficientBalance { balance } => Err(LedgerError::InsufficientBalance {
        user_id,
        balance,
        requested: request.amount.saturating_neg(),
      }),
      WriteOutcome::AmountOverflow { balance } => Err(LedgerError::AmountOverflow {
        user_id,
        balance,
        amount: request.amount,
      }),
      WriteOutcome::TopicClosed { status } => Err(LedgerError::TopicClosed {
        topic_id: topic_id.unwrap_or_default(),
        status,
      }),
      WriteOutcome::BetRejected => Err(LedgerError::BetSettleRejected {
        bet_id: bet_id.unwrap_or_default(),
      }),
    }
  }
}
