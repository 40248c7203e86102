//! Snapshot Store - Atomic JSON Store Snapshots
//!
//! Saves the full in-memory store (balances, ledger, bets, topics,
//! resolutions, settlement records) to `store.json` using atomic writes
//! (write to tmp file, then rename), so the file is always either the
//! previous or the new snapshot and never a partial write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, instrument};

use super::memory_store::StoreTables;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 2;

/// Serialized form of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub timestamp_ms: i64,
    pub tables: StoreTables,
}

impl StoreSnapshot {
    pub fn new(tables: StoreTables) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            tables,
        }
    }
}

/// Atomic JSON snapshot store for crash recovery.
pub struct SnapshotStore {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl SnapshotStore {
    /// Create a snapshot store in `data_dir`, creating the directory if needed.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let dir = Path::new(data_dir);
        fs::create_dir_all(dir)
            .await
            .context("Failed to create data directory")?;

        Ok(Self {
            path: dir.join("store.json"),
            tmp_path: dir.join("store.json.tmp"),
        })
    }

    /// Save a snapshot atomically (tmp → rename).
    #[instrument(skip(self, snapshot))]
    pub async fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp snapshot file")?;
        fs::rename(&self.tmp_path, &self.path)
            .await
            .context("Failed to rename snapshot file")?;

        info!(
            path = %self.path.display(),
            entries = snapshot.tables.ledger.len(),
            bets = snapshot.tables.bets.len(),
            "Store snapshot saved"
        );
        Ok(())
    }

    /// Load the latest snapshot; `None` on first start.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.path.exists() {
            info!("No snapshot found, starting with an empty store");
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)
            .await
            .context("Failed to read snapshot file")?;
        let snapshot: StoreSnapshot =
            serde_json::from_str(&json).context("Failed to parse snapshot JSON")?;

        anyhow::ensure!(
            snapshot.version == SNAPSHOT_VERSION,
            "Unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
            snapshot.version
        );

        info!(
            entries = snapshot.tables.ledger.len(),
            users = snapshot.tables.balances.len(),
            "Store snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    /// Check if the snapshot file is readable (absence is fine).
    pub async fn is_healthy(&self) -> bool {
        if !self.path.exists() {
            return true;
        }
        fs::metadata(&self.path).await.is_ok()
    }
}
