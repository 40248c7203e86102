//! Ledger Journal - Append-only JSONL Store Events
//!
//! Every committed store mutation (ledger entry with its bet effect,
//! topic status, resolution, zero-payout bet flip, settlement record) is
//! appended to `ledger/YYYY-MM-DD.jsonl` with the commit sequence number
//! it got inside the store. Each line is a self-contained JSON record, so
//! the trail can be streamed and grepped for audits, and replayed on top
//! of the last snapshot after a restart.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::domain::types::{BetId, LedgerEntry, Points, Resolution, SettlementRecord, Topic};
use crate::ports::store::BetEffect;

/// A committed store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    /// Balance moved to `entry.balance_after`; the bet effect committed with it.
    Entry {
        entry: LedgerEntry,
        bet_effect: Option<BetEffect>,
    },
    TopicStatus {
        topic: Topic,
    },
    Resolution {
        resolution: Resolution,
    },
    /// Bet flipped settled without a ledger entry.
    BetSettled {
        bet_id: BetId,
        payout: Points,
    },
    /// Settlement record inserted and topic flipped to RESOLVED.
    Settlement {
        record: SettlementRecord,
    },
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Store commit sequence; strictly increasing per store.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: StoreEvent,
}

/// Append-only JSONL journal with daily file rotation.
pub struct LedgerJournal {
    ledger_dir: PathBuf,
}

impl LedgerJournal {
    /// Create the journal directory under `data_dir`.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let ledger_dir = Path::new(data_dir).join("ledger");
        fs::create_dir_all(&ledger_dir)
            .await
            .context("Failed to create ledger journal directory")?;

        Ok(Self { ledger_dir })
    }

    /// Append one record to the file of its commit day.
    #[instrument(skip(self, record), fields(seq = record.seq))]
    pub async fn append(&self, record: &JournalRecord) -> Result<()> {
        let date = record.at.format("%Y-%m-%d").to_string();
        let path = self.ledger_dir.join(format!("{date}.jsonl"));

        let mut json =
            serde_json::to_string(record).context("Failed to serialize journal record")?;
        json.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context("Failed to open journal file")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write journal record")?;
        file.flush().await.context("Failed to flush journal")?;
        Ok(())
    }

    /// Load every record from every daily file, ordered by sequence.
    pub async fn load_records(&self) -> Result<Vec<JournalRecord>> {
        let mut records = Vec::new();
        let mut dir = fs::read_dir(&self.ledger_dir)
            .await
            .context("Failed to read ledger journal directory")?;

        while let Some(file) = dir.next_entry().await? {
            let path = file.path();
            if path.extension().is_none_or(|ext| ext != "jsonl") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<JournalRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "Skipping malformed journal line");
                    }
                }
            }
        }

        records.sort_by_key(|r| r.seq);
        info!(count = records.len(), "Loaded ledger journal");
        Ok(records)
    }

    /// Check if the journal directory is writable.
    pub async fn is_healthy(&self) -> bool {
        let marker = self.ledger_dir.join(".health_check");
        let result = fs::write(&marker, b"ok").await;
        let _ = fs::remove_file(&marker).await;
        result.is_ok()
    }
}
