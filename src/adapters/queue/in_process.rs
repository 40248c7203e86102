//! In-Process Job Queue - Degraded Single-Shot Fallback
//!
//! Used when the durable journal is disabled or cannot be opened. Each
//! accepted job is spawned immediately; an in-memory state table keeps at
//! most one job per topic until it is cleared or, once completed, pruned.
//! Nothing survives a restart, the recovery sweep re-submits whatever was
//! lost.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::types::TopicId;
use crate::ports::job_queue::{EnqueueOutcome, JobQueue, JobState, SettlementJob};
use crate::usecases::settlement_jobs::JobRunner;

type StateTable = Arc<Mutex<HashMap<TopicId, JobState>>>;

/// Spawn-per-job queue with an in-memory in-flight table.
pub struct InProcessQueue {
    runner: Arc<JobRunner>,
    states: StateTable,
}

impl InProcessQueue {
    pub fn new(runner: Arc<JobRunner>) -> Self {
        Self {
            runner,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn table(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<TopicId, JobState>>> {
        self.states
            .lock()
            .map_err(|_| anyhow::anyhow!("job state table poisoned"))
    }
}

#[async_trait]
impl JobQueue for InProcessQueue {
    async fn submit(&self, job: SettlementJob) -> anyhow::Result<EnqueueOutcome> {
        {
            let mut table = self.table()?;
            if let Some(state) = table.get(&job.topic_id) {
                debug!(topic_id = %job.topic_id, state = ?state, "Job already tracked");
                return Ok(EnqueueOutcome::AlreadyQueued);
            }
            table.insert(job.topic_id.clone(), JobState::Waiting);
        }

        info!(topic_id = %job.topic_id, kind = ?job.kind, "Spawning in-process settlement job");
        let runner = Arc::clone(&self.runner);
        let states = Arc::clone(&self.states);
        tokio::spawn(async move {
            runner
                .run(&job, "in_process", |state| {
                    if let Ok(mut table) = states.lock() {
                        table.insert(job.topic_id.clone(), state);
                    }
                })
                .await;
        });

        Ok(EnqueueOutcome::Accepted)
    }

    async fn clear(&self, topic_id: &str) -> anyhow::Result<bool> {
        let mut table = self.table()?;
        match table.get(topic_id) {
            Some(state) if !state.is_in_flight() => {
                table.remove(topic_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn prune_completed(&self) -> anyhow::Result<usize> {
        let mut table = self.table()?;
        let before = table.len();
        table.retain(|_, state| *state != JobState::Completed);
        Ok(before - table.len())
    }

    async fn state(&self, topic_id: &str) -> Option<JobState> {
        self.states.lock().ok()?.get(topic_id).copied()
    }

    fn backend(&self) -> &'static str {
        "in_process"
    }
}
