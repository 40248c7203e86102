//! Shared Cache Port - Remote Key/Value Tier
//!
//! Minimal get/set contract of the optional shared cache that backs the
//! in-process pool price cache. Values are opaque strings (JSON); every
//! entry carries a TTL. Callers treat any error as a miss.

use std::time::Duration;

use async_trait::async_trait;

/// Trait for shared cache providers.
#[async_trait]
pub trait SharedCache: Send + Sync + 'static {
  /// Fetch a value; `Ok(None)` on miss or expiry.
  async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

  /// Store a value for at most `ttl`.
  async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
}
