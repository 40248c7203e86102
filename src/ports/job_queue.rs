//! Job Queue Port - Settlement Job Dispatch Interface
//!
//! Jobs are keyed by topic id, so at most one settlement job per topic is
//! ever in flight no matter how often it is requested. Implementations:
//! a durable file-journal queue with a worker pool, and an in-process
//! single-shot fallback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::{TopicId, UserId};

/// What a job should do with its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
  /// Pay out a resolved LOCKED topic.
  Settle,
  /// Refund every bet of a CANCELED topic.
  Refund,
}

/// A settlement request addressed by its topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementJob {
  pub topic_id: TopicId,
  pub settled_by_id: UserId,
  pub kind: JobKind,
  pub requested_at: DateTime<Utc>,
}

impl SettlementJob {
  pub fn settle(topic_id: impl Into<TopicId>, settled_by_id: impl Into<UserId>) -> Self {
    Self {
      topic_id: topic_id.into(),
      settled_by_id: settled_by_id.into(),
      kind: JobKind::Settle,
      requested_at: Utc::now(),
    }
  }

  pub fn refund(topic_id: impl Into<TopicId>, requested_by: impl Into<UserId>) -> Self {
    Self {
      topic_id: topic_id.into(),
      settled_by_id: requested_by.into(),
      kind: JobKind::Refund,
      requested_at: Utc::now(),
    }
  }
}

/// Lifecycle state of a keyed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
  Waiting,
  Active,
  /// Waiting out the backoff before the next attempt.
  Delayed,
  Completed,
  Failed,
}

impl JobState {
  /// Waiting, active or delayed.
  pub const fn is_in_flight(self) -> bool {
    matches!(self, Self::Waiting | Self::Active | Self::Delayed)
  }
}

/// Result of a submit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
  Accepted,
  AlreadyQueued,
}

/// Trait for settlement job queues.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
  /// Enqueue unless a job for the same topic is waiting, active, delayed,
  /// or finished and not yet cleared.
  async fn submit(&self, job: SettlementJob) -> anyhow::Result<EnqueueOutcome>;

  /// Forget a completed or failed job so the topic can be re-submitted.
  /// Returns `false` if nothing was cleared (unknown or still in flight).
  async fn clear(&self, topic_id: &str) -> anyhow::Result<bool>;

  /// Forget every completed job. A completed topic already carries its
  /// settlement record (or has no unsettled bets left), so a re-submitted
  /// job would be a no-op. Returns the number of jobs dropped.
  async fn prune_completed(&self) -> anyhow::Result<usize>;

  /// Current state of the topic's job, if tracked.
  async fn state(&self, topic_id: &str) -> Option<JobState>;

  /// Backend name for logs and health output.
  fn backend(&self) -> &'static str;
}
