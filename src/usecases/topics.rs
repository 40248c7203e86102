//! Topic Hooks Use Case - Collaborator-Owned Lifecycle Mirror
//!
//! The topic lifecycle and the winning outcome are decided outside the
//! engine. These hooks let that owner mirror status changes and record
//! resolutions; cancellations enqueue a refund job.
//!
//! Both hooks run under `topic:<id>`, the lock a settlement or refund run
//! holds, so they never interleave with a run. Once any bet of the topic
//! is settled, the resolution result and the status are frozen: a later
//! run must recompute exactly the payouts already credited.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::domain::types::{Choice, Resolution, Topic, TopicId, TopicStatus, UserId};
use crate::ports::job_queue::{JobQueue, SettlementJob};
use crate::ports::lock::{LockManager, topic_key, with_exclusive};
use crate::ports::store::LedgerStore;

/// Failures of the topic hooks.
#[derive(Debug, Error)]
pub enum TopicError {
  #[error("RESOLVED is set only by settlement")]
  ResolvedIsEngineOwned,

  #[error("topic {0} is already settled")]
  AlreadySettled(TopicId),

  #[error("topic {0} has settled bets; only the current status and result are accepted")]
  PartiallySettled(TopicId),

  #[error("topic {0} is being settled, retry later")]
  Busy(TopicId),

  #[error("topic store failure: {0:#}")]
  Store(#[from] anyhow::Error),
}

impl TopicError {
  pub const fn code(&self) -> &'static str {
    match self {
      Self::ResolvedIsEngineOwned => "STATUS_NOT_ALLOWED",
      Self::AlreadySettled(_) => "ALREADY_SETTLED",
      Self::PartiallySettled(_) => "PARTIALLY_SETTLED",
      Self::Busy(_) => "TOPIC_BUSY",
      Self::Store(_) => "STORE_FAILURE",
    }
  }
}

/// Resolution supplied by an external resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
  pub topic_id: TopicId,
  pub result: Choice,
  pub summary: String,
  pub resolver_id: UserId,
}

pub struct TopicService {
  store: Arc<dyn LedgerStore>,
  queue: Arc<dyn JobQueue>,
  locks: Arc<dyn LockManager>,
  /// Maximum wait for the topic lock.
  lock_wait: Duration,
  /// Recorded as requester of refund jobs.
  system_actor: UserId,
}

impl TopicService {
  pub fn new(
    store: Arc<dyn LedgerStore>,
    queue: Arc<dyn JobQueue>,
    locks: Arc<dyn LockManager>,
    lock_wait: Duration,
    system_actor: UserId,
  ) -> Self {
    Self {
      store,
      queue,
      locks,
      lock_wait,
      system_actor,
    }
  }

  /// Mirror a status decided by the lifecycle owner.
  #[instrument(skip(self))]
  pub async fn set_status(&self, topic_id: &str, status: TopicStatus) -> Result<Topic, TopicError> {
    if status == TopicStatus::Resolved {
      return Err(TopicError::ResolvedIsEngineOwned);
    }

    let topic = self
      .exclusive(topic_id, || async {
        if self.store.settlement(topic_id).await?.is_some() {
          return Err(TopicError::AlreadySettled(topic_id.to_string()));
        }
        if self.has_settled_bets(topic_id).await? {
          let current = self.store.topic(topic_id).await?.map(|t| t.status);
          if current != Some(status) {
            warn!(topic_id, current = ?current, requested = %status, "Status change refused after partial settlement");
            return Err(TopicError::PartiallySettled(topic_id.to_string()));
          }
        }
        Ok(self.store.put_topic_status(topic_id, status).await?)
      })
      .await?;
    info!(topic_id, status = %status, "Topic status mirrored");

    if status == TopicStatus::Canceled {
      let job = SettlementJob::refund(topic_id, self.system_actor.clone());
      if let Err(e) = self.queue.submit(job).await {
        // The recovery sweep picks canceled topics up again.
        warn!(topic_id, error = %e, "Failed to enqueue refund job");
      }
    }
    Ok(topic)
  }

  /// Insert or replace the topic's resolution while it is unsettled.
  #[instrument(skip(self, request), fields(topic_id = %request.topic_id))]
  pub async fn record_resolution(&self, request: ResolutionRequest) -> Result<Resolution, TopicError> {
    let resolution = Resolution {
      topic_id: request.topic_id,
      result: request.result,
      summary: request.summary,
      resolver_id: request.resolver_id,
      resolved_at: Utc::now(),
    };
    let topic_id = resolution.topic_id.clone();

    self
      .exclusive(&topic_id, || async {
        let previous = self.store.resolution(&topic_id).await?;
        if previous.is_some_and(|p| p.result != resolution.result)
          && self.has_settled_bets(&topic_id).await?
        {
          warn!(result = %resolution.result, "Resolution change refused after partial settlement");
          return Err(TopicError::PartiallySettled(topic_id.clone()));
        }
        if !self.store.upsert_resolution(resolution.clone()).await? {
          return Err(TopicError::AlreadySettled(topic_id.clone()));
        }
        Ok(())
      })
      .await?;
    info!(result = %resolution.result, "Resolution recorded");
    Ok(resolution)
  }

  async fn has_settled_bets(&self, topic_id: &str) -> anyhow::Result<bool> {
    Ok(self.store.bets_for_topic(topic_id).await?.iter().any(|b| b.settled))
  }

  /// Run `f` holding the topic lock; a timeout means a run is in progress.
  async fn exclusive<F, Fut, T>(&self, topic_id: &str, f: F) -> Result<T, TopicError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, TopicError>>,
  {
    with_exclusive(self.locks.as_ref(), &topic_key(topic_id), self.lock_wait, f)
      .await?
      .ok_or_else(|| TopicError::Busy(topic_id.to_string()))
  }
}
