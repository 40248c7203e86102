//! Pool Price Cache Use Case - Two-Tier Read-Through Cache
//!
//! Short-TTL cache of per-topic yes/no pool totals and implied prices for
//! read paths. A process-local memory tier sits in front of an optional
//! shared remote tier. Never consulted by settlement and never held under
//! a ledger lock; a stale or missing entry only costs a recompute.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::adapters::metrics::ServiceMetrics;
use crate::domain::types::{Points, PoolStats, TopicId};
use crate::ports::cache::SharedCache;

fn cache_key(topic_id: &str) -> String {
  format!("pool:{topic_id}")
}

/// Two-tier pool statistics cache.
pub struct PoolCache {
  /// Memory tier keyed by topic id.
  memory: RwLock<HashMap<TopicId, PoolStats>>,
  /// Optional shared tier.
  remote: Option<Arc<dyn SharedCache>>,
  /// Entry lifetime in both tiers.
  ttl: Duration,
  /// When false every lookup misses and nothing is stored.
  enabled: bool,
  metrics: Arc<ServiceMetrics>,
}

impl PoolCache {
  pub fn new(
    enabled: bool,
    ttl: Duration,
    remote: Option<Arc<dyn SharedCache>>,
    metrics: Arc<ServiceMetrics>,
  ) -> Self {
    Self {
      memory: RwLock::new(HashMap::new()),
      remote,
      ttl,
      enabled,
      metrics,
    }
  }

  fn is_fresh(&self, stats: &PoolStats) -> bool {
    let age = Utc::now() - stats.cached_at;
    age.to_std().map_or(true, |age| age < self.ttl)
  }

  fn count(&self, tier: &str, result: &str) {
    self
      .metrics
      .cache_lookups
      .with_label_values(&[tier, result])
      .inc();
  }

  /// Unexpired snapshot from either tier, or `None` on miss.
  pub async fn get(&self, topic_id: &str) -> Option<PoolStats> {
    if !self.enabled {
      return None;
    }

    if let Some(stats) = self.memory.read().await.get(topic_id) {
      if self.is_fresh(stats) {
        self.count("memory", "hit");
        return Some(stats.clone());
      }
    }
    self.count("memory", "miss");

    let remote = self.remote.as_ref()?;
    match remote.get(&cache_key(topic_id)).await {
      Ok(Some(raw)) => match serde_json::from_str::<PoolStats>(&raw) {
        Ok(stats) if self.is_fresh(&stats) => {
          self.count("remote", "hit");
          self
            .memory
            .write()
            .await
            .insert(topic_id.to_string(), stats.clone());
          Some(stats)
        }
        Ok(_) => {
          self.count("remote", "miss");
          None
        }
        Err(e) => {
          debug!(topic_id, error = %e, "Discarding malformed remote pool entry");
          self.count("remote", "error");
          None
        }
      },
      Ok(None) => {
        self.count("remote", "miss");
        None
      }
      Err(e) => {
        debug!(topic_id, error = %e, "Remote pool cache read failed");
        self.count("remote", "error");
        None
      }
    }
  }

  /// Derive prices from the pool totals and store them in both tiers.
  pub async fn set(&self, topic_id: &str, yes_pool: Points, no_pool: Points) -> PoolStats {
    let stats = PoolStats::from_pools(yes_pool, no_pool);
    if !self.enabled {
      return stats;
    }

    self
      .memory
      .write()
      .await
      .insert(topic_id.to_string(), stats.clone());

    if let Some(remote) = &self.remote {
      match serde_json::to_string(&stats) {
        Ok(json) => {
          if let Err(e) = remote.set(&cache_key(topic_id), &json, self.ttl).await {
            warn!(topic_id, error = %e, "Remote pool cache write failed");
          }
        }
        Err(e) => warn!(topic_id, error = %e, "Failed to encode pool stats"),
      }
    }

    stats
  }

  /// Drop the memory entry; the remote entry expires on its own.
  pub async fn invalidate(&self, topic_id: &str) {
    self.memory.write().await.remove(topic_id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cache(enabled: bool, ttl: Duration) -> PoolCache {
    PoolCache::new(enabled, ttl, None, Arc::new(ServiceMetrics::new().unwrap()))
  }

  #[tokio::test]
  async fn test_set_then_get_hits_memory() {
    let cache = cache(true, Duration::from_secs(10));
    assert!(cache.get("t1").await.is_none());

    let stored = cache.set("t1", 300, 100).await;
    assert!((stored.yes_price - 0.75).abs() < 1e-12);

    let hit = cache.get("t1").await.unwrap();
    assert_eq!(hit.total_pool, 400);
  }

  #[tokio::test]
  async fn test_disabled_cache_always_misses() {
    let cache = cache(false, Duration::from_secs(10));
    let stats = cache.set("t1", 1, 1).await;
    assert_eq!(stats.total_pool, 2);
    assert!(cache.get("t1").await.is_none());
  }

  #[tokio::test]
  async fn test_expired_entry_misses() {
    let cache = cache(true, Duration::from_millis(20));
    cache.set("t1", 5, 5).await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(cache.get("t1").await.is_none());
  }

  #[tokio::test]
  async fn test_invalidate_drops_memory_entry() {
    let cache = cache(true, Duration::from_secs(10));
    cache.set("t1", 5, 5).await;
    cache.invalidate("t1").await;
    assert!(cache.get("t1").await.is_none());
  }
}
