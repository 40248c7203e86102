//! Settlement Jobs Use Case - Retry Driver and Recovery Sweep
//!
//! `JobRunner` executes one keyed job with bounded, fixed-backoff retries
//! of the retryable error subset; both queue backends delegate to it.
//! `RecoverySweep` finds topics that should have been settled or refunded
//! and either runs them directly (operator endpoint) or re-submits them
//! through the queue (periodic task).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use super::settlement::{SettlementOrchestrator, SettlementOutcome};
use crate::adapters::metrics::ServiceMetrics;
use crate::domain::errors::SettlementError;
use crate::domain::types::{Points, TopicId, UserId};
use crate::ports::job_queue::{EnqueueOutcome, JobKind, JobQueue, JobState, SettlementJob};
use crate::ports::store::LedgerStore;

/// Bounded retry with fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts including the first (>= 1).
  pub max_attempts: u32,
  pub backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff: Duration::from_secs(1),
    }
  }
}

/// Executes settlement jobs with retries.
pub struct JobRunner {
  orchestrator: Arc<SettlementOrchestrator>,
  policy: RetryPolicy,
  metrics: Arc<ServiceMetrics>,
}

impl JobRunner {
  pub fn new(
    orchestrator: Arc<SettlementOrchestrator>,
    policy: RetryPolicy,
    metrics: Arc<ServiceMetrics>,
  ) -> Self {
    Self {
      orchestrator,
      policy,
      metrics,
    }
  }

  pub const fn policy(&self) -> RetryPolicy {
    self.policy
  }

  /// One attempt without retries.
  pub async fn attempt(&self, job: &SettlementJob) -> Result<SettlementOutcome, SettlementError> {
    match job.kind {
      JobKind::Settle => {
        self
          .orchestrator
          .settle_topic(&job.topic_id, &job.settled_by_id)
          .await
      }
      JobKind::Refund => self.orchestrator.refund_canceled_topic(&job.topic_id).await,
    }
  }

  /// Run `job` to a terminal state, reporting each transition through
  /// `set_state`. Returns `Completed` or `Failed`.
  #[instrument(skip(self, job, set_state), fields(topic_id = %job.topic_id, kind = ?job.kind))]
  pub async fn run<S>(&self, job: &SettlementJob, backend: &'static str, set_state: S) -> JobState
  where
    S: Fn(JobState) + Send + Sync,
  {
    let max_attempts = self.policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
      set_state(JobState::Active);
      let result = self.attempt(job).await;

      let label = match &result {
        Ok(_) | Err(SettlementError::AlreadySettled(_)) => "completed",
        Err(e) if e.is_retryable() && attempt < max_attempts => "retry",
        Err(_) => "failed",
      };
      self
        .metrics
        .job_attempts
        .with_label_values(&[backend, label])
        .inc();

      match result {
        Ok(_) | Err(SettlementError::AlreadySettled(_)) => {
          info!(attempt, "Settlement job completed");
          set_state(JobState::Completed);
          return JobState::Completed;
        }
        Err(e) if e.is_retryable() && attempt < max_attempts => {
          warn!(
            attempt,
            max_attempts,
            code = e.code(),
            backoff_ms = self.policy.backoff.as_millis(),
            "Retryable settlement failure, backing off"
          );
          set_state(JobState::Delayed);
          tokio::time::sleep(self.policy.backoff).await;
          attempt += 1;
        }
        Err(e) => {
          error!(attempt, code = e.code(), error = %e, "Settlement job failed");
          set_state(JobState::Failed);
          return JobState::Failed;
        }
      }
    }
  }
}

// ── Recovery sweep ────────────────────────────────────────

/// Result of one topic in a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSweepResult {
  pub topic_id: TopicId,
  pub kind: JobKind,
  pub success: bool,
  /// `settled`, `refunded`, `in_progress`, `already_settled` or an error code.
  pub status: String,
  pub payout_total: Option<Points>,
  pub error: Option<String>,
}

/// Aggregated report of a direct sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
  pub total: usize,
  pub success: usize,
  pub failed: usize,
  pub per_topic_results: Vec<TopicSweepResult>,
  pub timestamp: DateTime<Utc>,
}

/// Finds and drives topics left behind by lost or failed jobs.
pub struct RecoverySweep {
  store: Arc<dyn LedgerStore>,
  runner: Arc<JobRunner>,
  queue: Arc<dyn JobQueue>,
  settled_by_id: UserId,
  /// Topics run at once by a direct sweep.
  concurrency: usize,
  batch_size: usize,
}

impl RecoverySweep {
  pub fn new(
    store: Arc<dyn LedgerStore>,
    runner: Arc<JobRunner>,
    queue: Arc<dyn JobQueue>,
    settled_by_id: UserId,
    concurrency: usize,
    batch_size: usize,
  ) -> Self {
    Self {
      store,
      runner,
      queue,
      settled_by_id,
      concurrency: concurrency.max(1),
      batch_size,
    }
  }

  /// Pending settle jobs first, then pending refunds, up to `limit`.
  async fn pending_jobs(&self, limit: usize) -> anyhow::Result<Vec<SettlementJob>> {
    let mut jobs: Vec<SettlementJob> = self
      .store
      .pending_settlements(limit)
      .await?
      .into_iter()
      .map(|topic| SettlementJob::settle(topic, self.settled_by_id.clone()))
      .collect();

    let remaining = limit.saturating_sub(jobs.len());
    if remaining > 0 {
      jobs.extend(
        self
          .store
          .pending_refunds(remaining)
          .await?
          .into_iter()
          .map(|topic| SettlementJob::refund(topic, self.settled_by_id.clone())),
      );
    }
    Ok(jobs)
  }

  /// Run up to `limit` pending topics directly, bounded by the sweep
  /// concurrency, and report per topic.
  #[instrument(skip(self))]
  pub async fn process_pending_settlements(&self, limit: usize) -> anyhow::Result<SweepReport> {
    let jobs = self.pending_jobs(limit).await?;
    info!(pending = jobs.len(), "Processing pending settlements");

    let per_topic_results: Vec<TopicSweepResult> = stream::iter(jobs)
      .map(|job| async move {
        let result = self.runner.attempt(&job).await;
        sweep_result(&job, result)
      })
      .buffer_unordered(self.concurrency)
      .collect()
      .await;

    let success = per_topic_results.iter().filter(|r| r.success).count();
    let report = SweepReport {
      total: per_topic_results.len(),
      success,
      failed: per_topic_results.len() - success,
      per_topic_results,
      timestamp: Utc::now(),
    };

    info!(
      total = report.total,
      success = report.success,
      failed = report.failed,
      "Pending settlement sweep complete"
    );
    Ok(report)
  }

  /// Re-submit pending topics through the queue, clearing stale terminal
  /// records first. Returns the number of accepted jobs.
  pub async fn resubmit_pending(&self) -> anyhow::Result<usize> {
    let jobs = self.pending_jobs(self.batch_size).await?;
    let mut accepted = 0;

    for job in jobs {
      if let Some(state) = self.queue.state(&job.topic_id).await {
        if !state.is_in_flight() {
          self.queue.clear(&job.topic_id).await?;
        }
      }
      if self.queue.submit(job).await? == EnqueueOutcome::Accepted {
        accepted += 1;
      }
    }

    if accepted > 0 {
      info!(accepted, backend = self.queue.backend(), "Recovery sweep re-submitted topics");
    }
    Ok(accepted)
  }

  /// Periodic sweep until shutdown. Each tick also prunes completed jobs
  /// from the queue.
  pub async fn run(&self, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Recovery sweep received shutdown signal");
          break;
        }
        _ = ticker.tick() => {
          if let Err(e) = self.queue.prune_completed().await {
            warn!(error = %e, "Failed to prune completed jobs");
          }
          if let Err(e) = self.resubmit_pending().await {
            warn!(error = %e, "Recovery sweep failed");
          }
        }
      }
    }
  }
}

fn sweep_result(
  job: &SettlementJob,
  result: Result<SettlementOutcome, SettlementError>,
) -> TopicSweepResult {
  let (success, status, payout_total, error) = match result {
    Ok(SettlementOutcome::Settled(record)) => {
      (true, "settled".to_string(), Some(record.payout_total), None)
    }
    Ok(SettlementOutcome::Refunded(summary)) => {
      (true, "refunded".to_string(), Some(summary.refunded_points), None)
    }
    Ok(SettlementOutcome::AlreadyInProgress) => (true, "in_progress".to_string(), None, None),
    Err(SettlementError::AlreadySettled(_)) => (true, "already_settled".to_string(), None, None),
    Err(e) => (false, e.code().to_string(), None, Some(e.to_string())),
  };

  TopicSweepResult {
    topic_id: job.topic_id.clone(),
    kind: job.kind,
    success,
    status,
    payout_total,
    error,
  }
}
