//! In-Process Lock Manager - Keyed Mutex Table
//!
//! Single-node implementation of the `LockManager` port: one
//! `tokio::sync::Mutex` per key, created on first use and removed when
//! the last holder releases it, so the table does not grow with the
//! number of users ever seen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::ports::lock::{LockGuard, LockManager};

type Table = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Keyed mutex table scoped to one process.
#[derive(Default, Clone)]
pub struct LocalLockManager {
  table: Table,
}

impl LocalLockManager {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of keys currently held or awaited.
  #[cfg(test)]
  fn active_keys(&self) -> usize {
    self.table.lock().map(|t| t.len()).unwrap_or(0)
  }
}

/// Removes the table entry when the last interested party lets go.
struct KeyedGuard {
  key: String,
  table: Table,
  guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
  fn drop(&mut self) {
    let Ok(mut table) = self.table.lock() else {
      return;
    };
    // Release first so strong_count only reflects the table and waiters.
    drop(self.guard.take());
    if table.get(&self.key).is_some_and(|m| Arc::strong_count(m) == 1) {
      table.remove(&self.key);
    }
  }
}

#[async_trait]
impl LockManager for LocalLockManager {
  async fn acquire(&self, key: &str, wait: Duration) -> anyhow::Result<Option<LockGuard>> {
    let mutex = {
      let mut table = self
        .table
        .lock()
        .map_err(|_| anyhow::anyhow!("lock table poisoned"))?;
      Arc::clone(table.entry(key.to_string()).or_default())
    };

    match tokio::time::timeout(wait, Arc::clone(&mutex).lock_owned()).await {
      Ok(guard) => {
        drop(mutex);
        Ok(Some(LockGuard::new(KeyedGuard {
          key: key.to_string(),
          table: Arc::clone(&self.table),
          guard: Some(guard),
        })))
      }
      Err(_) => {
        debug!(key, wait_ms = wait.as_millis(), "Lock wait timed out");
        drop(mutex);
        // Clean up if nobody else is holding or waiting.
        if let Ok(mut table) = self.table.lock() {
          if table.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
            table.remove(key);
          }
        }
        Ok(None)
      }
    }
  }
}
