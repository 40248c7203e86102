//! Durable Job Queue - JSONL Journal with Worker Pool
//!
//! Every state transition of a keyed job is appended to `jobs.jsonl`.
//! On start the journal is replayed and compacted:
//! - waiting, active and delayed jobs are re-dispatched
//! - failed jobs keep blocking re-submission until cleared
//! - completed jobs are dropped, as `prune_completed` does while running
//!
//! A dispatcher task feeds a worker pool bounded by a semaphore; each
//! worker runs one job to a terminal state through the shared `JobRunner`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::domain::types::TopicId;
use crate::ports::job_queue::{EnqueueOutcome, JobQueue, JobState, SettlementJob};
use crate::usecases::settlement_jobs::JobRunner;

/// One line of the job journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JournalEvent {
    State {
        job: SettlementJob,
        state: JobState,
        at: DateTime<Utc>,
    },
    Cleared {
        topic_id: TopicId,
        at: DateTime<Utc>,
    },
}

type StateTable = Arc<Mutex<HashMap<TopicId, (SettlementJob, JobState)>>>;

/// Record a transition in memory and hand it to the journal writer.
fn record_state(
    states: &StateTable,
    journal_tx: &mpsc::UnboundedSender<JournalEvent>,
    job: &SettlementJob,
    state: JobState,
) {
    if let Ok(mut table) = states.lock() {
        table.insert(job.topic_id.clone(), (job.clone(), state));
    }
    let _ = journal_tx.send(JournalEvent::State {
        job: job.clone(),
        state,
        at: Utc::now(),
    });
}

/// File-journal backed queue with bounded concurrency.
pub struct DurableQueue {
    states: StateTable,
    dispatch_tx: mpsc::UnboundedSender<SettlementJob>,
    journal_tx: mpsc::UnboundedSender<JournalEvent>,
}

impl DurableQueue {
    /// Replay the journal in `journal_dir`, start the writer and dispatcher
    /// tasks, and re-dispatch unfinished jobs.
    #[instrument(skip(runner, shutdown_rx))]
    pub async fn start(
        journal_dir: &str,
        runner: Arc<JobRunner>,
        concurrency: usize,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let dir = Path::new(journal_dir);
        fs::create_dir_all(dir)
            .await
            .context("Failed to create job journal directory")?;
        let path = dir.join("jobs.jsonl");

        let replayed = replay(&path).await?;
        compact(&path, &replayed).await?;

        let (journal_tx, journal_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_journal(path, journal_rx));

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let resumable: Vec<SettlementJob> = replayed
            .values()
            .filter(|(_, state)| state.is_in_flight())
            .map(|(job, _)| job.clone())
            .collect();

        let queue = Self {
            states: Arc::new(Mutex::new(replayed)),
            dispatch_tx,
            journal_tx,
        };

        tokio::spawn(dispatch_loop(
            dispatch_rx,
            runner,
            Arc::clone(&queue.states),
            queue.journal_tx.clone(),
            concurrency.max(1),
            shutdown_rx,
        ));

        info!(
            resumed = resumable.len(),
            concurrency,
            "Durable settlement queue started"
        );
        for job in resumable {
            queue.enqueue(job)?;
        }
        Ok(queue)
    }

    fn enqueue(&self, job: SettlementJob) -> Result<()> {
        record_state(&self.states, &self.journal_tx, &job, JobState::Waiting);
        self.dispatch_tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("settlement dispatcher stopped"))
    }

    fn table(&self) -> Result<std::sync::MutexGuard<'_, HashMap<TopicId, (SettlementJob, JobState)>>> {
        self.states
            .lock()
            .map_err(|_| anyhow::anyhow!("job state table poisoned"))
    }
}

#[async_trait]
impl JobQueue for DurableQueue {
    async fn submit(&self, job: SettlementJob) -> Result<EnqueueOutcome> {
        {
            let mut table = self.table()?;
            if let Some((_, state)) = table.get(&job.topic_id) {
                debug!(topic_id = %job.topic_id, state = ?state, "Job already tracked");
                return Ok(EnqueueOutcome::AlreadyQueued);
            }
            table.insert(job.topic_id.clone(), (job.clone(), JobState::Waiting));
        }
        info!(topic_id = %job.topic_id, kind = ?job.kind, "Settlement job queued");
        self.enqueue(job)?;
        Ok(EnqueueOutcome::Accepted)
    }

    async fn clear(&self, topic_id: &str) -> Result<bool> {
        let cleared = {
            let mut table = self.table()?;
            match table.get(topic_id) {
                Some((_, state)) if !state.is_in_flight() => {
                    table.remove(topic_id);
                    true
                }
                _ => false,
            }
        };
        if cleared {
            let _ = self.journal_tx.send(JournalEvent::Cleared {
                topic_id: topic_id.to_string(),
                at: Utc::now(),
            });
        }
        Ok(cleared)
    }

    async fn prune_completed(&self) -> Result<usize> {
        let pruned: Vec<TopicId> = {
            let mut table = self.table()?;
            let completed: Vec<TopicId> = table
                .iter()
                .filter(|(_, (_, state))| *state == JobState::Completed)
                .map(|(topic_id, _)| topic_id.clone())
                .collect();
            for topic_id in &completed {
                table.remove(topic_id);
            }
            completed
        };
        let at = Utc::now();
        for topic_id in &pruned {
            let _ = self.journal_tx.send(JournalEvent::Cleared {
                topic_id: topic_id.clone(),
                at,
            });
        }
        if !pruned.is_empty() {
            debug!(count = pruned.len(), "Pruned completed settlement jobs");
        }
        Ok(pruned.len())
    }

    async fn state(&self, topic_id: &str) -> Option<JobState> {
        self.states.lock().ok()?.get(topic_id).map(|(_, state)| *state)
    }

    fn backend(&self) -> &'static str {
        "durable"
    }
}

/// Feed jobs to workers, at most `concurrency` at a time.
async fn dispatch_loop(
    mut dispatch_rx: mpsc::UnboundedReceiver<SettlementJob>,
    runner: Arc<JobRunner>,
    states: StateTable,
    journal_tx: mpsc::UnboundedSender<JournalEvent>,
    concurrency: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let permits = Arc::new(Semaphore::new(concurrency));

    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            job = dispatch_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let runner = Arc::clone(&runner);
        let states = Arc::clone(&states);
        let journal_tx = journal_tx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            runner
                .run(&job, "durable", |state| {
                    record_state(&states, &journal_tx, &job, state);
                })
                .await;
        });
    }

    info!("Settlement dispatcher stopped");
}

/// Append journal events until every sender is dropped.
async fn write_journal(path: PathBuf, mut journal_rx: mpsc::UnboundedReceiver<JournalEvent>) {
    while let Some(event) = journal_rx.recv().await {
        if let Err(e) = append_event(&path, &event).await {
            warn!(path = %path.display(), error = %e, "Failed to append job journal event");
        }
    }
}

async fn append_event(path: &Path, event: &JournalEvent) -> Result<()> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Fold the journal into the latest state per topic; completed jobs are
/// not carried forward.
async fn replay(path: &Path) -> Result<HashMap<TopicId, (SettlementJob, JobState)>> {
    let mut table = HashMap::new();
    if !path.exists() {
        return Ok(table);
    }

    let content = fs::read_to_string(path)
        .await
        .context("Failed to read job journal")?;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<JournalEvent>(line) {
            Ok(JournalEvent::State { job, state, .. }) => {
                table.insert(job.topic_id.clone(), (job, state));
            }
            Ok(JournalEvent::Cleared { topic_id, .. }) => {
                table.remove(&topic_id);
            }
            Err(e) => warn!(error = %e, "Skipping malformed job journal line"),
        }
    }
    table.retain(|_, (_, state)| *state != JobState::Completed);
    Ok(table)
}

/// Rewrite the journal with one line per tracked topic (tmp -> rename).
async fn compact(path: &Path, table: &HashMap<TopicId, (SettlementJob, JobState)>) -> Result<()> {
    let mut content = String::new();
    for (job, state) in table.values() {
        let event = JournalEvent::State {
            job: job.clone(),
            state: *state,
            at: Utc::now(),
        };
        content.push_str(&serde_json::to_string(&event)?);
        content.push('\n');
    }

    let tmp = path.with_extension("jsonl.tmp");
    fs::write(&tmp, content)
        .await
        .context("Failed to write compacted job journal")?;
    fs::rename(&tmp, path)
        .await
        .context("Failed to replace job journal")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapters::coordination::LocalLockManager;
    use crate::adapters::metrics::ServiceMetrics;
    use crate::adapters::persistence::MemoryStore;
    use crate::domain::fees::FeeSchedule;
    use crate::domain::types::{Choice, Resolution, TopicStatus};
    use crate::ports::store::LedgerStore;
    use crate::usecases::ledger_writer::LedgerWriter;
    use crate::usecases::settlement::SettlementOrchestrator;
    use crate::usecases::settlement_jobs::RetryPolicy;

    fn temp_dir() -> String {
        std::env::temp_dir()
            .join(format!("point_ledger_jobs_{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string()
    }

    fn runner(store: Arc<MemoryStore>) -> Arc<JobRunner> {
        let locks = Arc::new(LocalLockManager::new());
        let metrics = Arc::new(ServiceMetrics::new().unwrap());
        let writer = Arc::new(LedgerWriter::new(
            store.clone(),
            locks.clone(),
            Duration::from_millis(100),
            Arc::clone(&metrics),
        ));
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            store,
            locks,
            writer,
            FeeSchedule::zero(),
            Duration::from_millis(100),
            Arc::clone(&metrics),
        ));
        Arc::new(JobRunner::new(orchestrator, RetryPolicy::default(), metrics))
    }

    async fn resolved_topic(store: &MemoryStore, topic: &str) {
        store.put_topic_status(topic, TopicStatus::Locked).await.unwrap();
        store
            .upsert_resolution(Resolution {
                topic_id: topic.into(),
                result: Choice::Yes,
                summary: String::new(),
                resolver_id: "r".into(),
                resolved_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    async fn wait_for(queue: &DurableQueue, topic: &str, expected: JobState) {
        for _ in 0..200 {
            if queue.state(topic).await == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job for {topic} never reached {expected:?}");
    }

    #[tokio::test]
    async fn test_submit_runs_job_and_blocks_until_cleared() {
        let dir = temp_dir();
        let store = Arc::new(MemoryStore::new());
        resolved_topic(&store, "t1").await;
        let (_tx, rx) = broadcast::channel(1);
        let queue = DurableQueue::start(&dir, runner(store.clone()), 2, rx)
            .await
            .unwrap();

        let job = SettlementJob::settle("t1", "admin");
        assert_eq!(queue.submit(job.clone()).await.unwrap(), EnqueueOutcome::Accepted);
        wait_for(&queue, "t1", JobState::Completed).await;
        assert!(store.settlement("t1").await.unwrap().is_some());

        assert_eq!(
            queue.submit(job.clone()).await.unwrap(),
            EnqueueOutcome::AlreadyQueued
        );
        assert!(queue.clear("t1").await.unwrap());
        assert_eq!(queue.submit(job).await.unwrap(), EnqueueOutcome::Accepted);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_completed_jobs_are_pruned_and_not_replayed() {
        let dir = temp_dir();
        let store = Arc::new(MemoryStore::new());
        resolved_topic(&store, "t1").await;
        let (tx, rx) = broadcast::channel(1);
        let queue = DurableQueue::start(&dir, runner(store.clone()), 1, rx)
            .await
            .unwrap();

        queue.submit(SettlementJob::settle("t1", "admin")).await.unwrap();
        wait_for(&queue, "t1", JobState::Completed).await;
        assert_eq!(queue.prune_completed().await.unwrap(), 1);
        assert!(queue.state("t1").await.is_none());
        assert_eq!(queue.prune_completed().await.unwrap(), 0);

        // A completed line that was never pruned is dropped on replay too.
        let path = Path::new(&dir).join("jobs.jsonl");
        append_event(
            &path,
            &JournalEvent::State {
                job: SettlementJob::settle("t9", "admin"),
                state: JobState::Completed,
                at: Utc::now(),
            },
        )
        .await
        .unwrap();
        let _ = tx.send(());
        assert!(replay(&path).await.unwrap().is_empty());

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_replay_redispatches_unfinished_jobs() {
        let dir = temp_dir();
        fs::create_dir_all(&dir).await.unwrap();
        let path = Path::new(&dir).join("jobs.jsonl");

        let pending = JournalEvent::State {
            job: SettlementJob::settle("t1", "admin"),
            state: JobState::Active,
            at: Utc::now(),
        };
        let failed = JournalEvent::State {
            job: SettlementJob::settle("t2", "admin"),
            state: JobState::Failed,
            at: Utc::now(),
        };
        append_event(&path, &pending).await.unwrap();
        append_event(&path, &failed).await.unwrap();

        let store = Arc::new(MemoryStore::new());
        resolved_topic(&store, "t1").await;
        let (_tx, rx) = broadcast::channel(1);
        let queue = DurableQueue::start(&dir, runner(store.clone()), 1, rx)
            .await
            .unwrap();

        wait_for(&queue, "t1", JobState::Completed).await;
        assert_eq!(queue.state("t2").await, Some(JobState::Failed));
        assert_eq!(
            queue
                .submit(SettlementJob::settle("t2", "admin"))
                .await
                .unwrap(),
            EnqueueOutcome::AlreadyQueued
        );

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_replay_honors_cleared_events() {
        let dir = temp_dir();
        fs::create_dir_all(&dir).await.unwrap();
        let path = Path::new(&dir).join("jobs.jsonl");
        append_event(
            &path,
            &JournalEvent::State {
                job: SettlementJob::settle("t1", "admin"),
                state: JobState::Failed,
                at: Utc::now(),
            },
        )
        .await
        .unwrap();
        append_event(
            &path,
            &JournalEvent::Cleared {
                topic_id: "t1".into(),
                at: Utc::now(),
            },
        )
        .await
        .unwrap();

        assert!(replay(&path).await.unwrap().is_empty());
        let _ = fs::remove_dir_all(&dir).await;
    }
}
