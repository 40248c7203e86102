//! Lock Port - Keyed Exclusive Sections
//!
//! Advisory-lock style mutual exclusion scoped to an arbitrary string key
//! (`user:<id>`, `topic:<id>`). Business logic only sees `with_exclusive`;
//! whether the lock is an in-process mutex, a database advisory lock or a
//! distributed lock service is an adapter detail.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

/// Held lock; released on drop.
pub struct LockGuard {
  _inner: Box<dyn Send + Sync>,
}

impl LockGuard {
  pub fn new(inner: impl Send + Sync + 'static) -> Self {
    Self {
      _inner: Box::new(inner),
    }
  }
}

impl std::fmt::Debug for LockGuard {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("LockGuard")
  }
}

/// Trait for keyed lock providers.
#[async_trait]
pub trait LockManager: Send + Sync + 'static {
  /// Acquire `key`, waiting at most `wait`. `Ok(None)` means timed out.
  async fn acquire(&self, key: &str, wait: Duration) -> anyhow::Result<Option<LockGuard>>;
}

/// Lock key of a user's balance.
pub fn user_key(user_id: &str) -> String {
  format!("user:{user_id}")
}

/// Lock key of a topic's settlement.
pub fn topic_key(topic_id: &str) -> String {
  format!("topic:{topic_id}")
}

/// Run `f` while holding `key`.
///
/// Returns `Ok(None)` when the lock could not be acquired within `wait`;
/// `f` is not run in that case.
pub async fn with_exclusive<L, F, Fut, T, E>(
  locks: &L,
  key: &str,
  wait: Duration,
  f: F,
) -> Result<Option<T>, E>
where
  L: LockManager + ?Sized,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: From<anyhow::Error>,
{
  let Some(guard) = locks.acquire(key, wait).await? else {
    return Ok(None);
  };
  let result = f().await;
  drop(guard);
  result.map(Some)
}
