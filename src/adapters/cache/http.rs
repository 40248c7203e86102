//! HTTP Shared Cache - Remote Key/Value Tier over REST
//!
//! Talks to a minimal key/value service:
//! - `GET {base}/{key}` returns the value (404 on miss or expiry)
//! - `PUT {base}/{key}?ttl_seconds=N` stores the body for `N` seconds
//!
//! Short timeouts keep a slow cache from stalling read paths; callers
//! treat every error as a miss.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::ports::cache::SharedCache;

/// reqwest-backed `SharedCache`.
pub struct HttpSharedCache {
  http: Client,
  /// Base URL without trailing slash.
  base_url: String,
}

impl HttpSharedCache {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let http = Client::builder()
      .timeout(timeout)
      .pool_max_idle_per_host(5)
      .build()
      .context("Failed to build cache HTTP client")?;

    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }

  fn url(&self, key: &str) -> String {
    format!("{}/{}", self.base_url, key)
  }
}

#[async_trait]
impl SharedCache for HttpSharedCache {
  async fn get(&self, key: &str) -> Result<Option<String>> {
    let response = self
      .http
      .get(self.url(key))
      .send()
      .await
      .context("Cache GET failed")?;

    match response.status() {
      StatusCode::NOT_FOUND => Ok(None),
      status if status.is_success() => {
        let body = response.text().await.context("Failed to read cache body")?;
        debug!(key, bytes = body.len(), "Remote cache hit");
        Ok(Some(body))
      }
      status => anyhow::bail!("cache GET {key} returned {status}"),
    }
  }

  async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
    let response = self
      .http
      .put(self.url(key))
      .query(&[("ttl_seconds", ttl.as_secs().max(1))])
      .header("Content-Type", "application/json")
      .body(value.to_string())
      .send()
      .await
      .context("Cache PUT failed")?;

    let status = response.status();
    anyhow::ensure!(status.is_success(), "cache PUT {key} returned {status}");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_url_joins_without_double_slash() {
    let cache = HttpSharedCache::new("http://cache.local:8000/kv/", Duration::from_millis(100)).unwrap();
    assert_eq!(cache.url("pool:t1"), "http://cache.local:8000/kv/pool:t1");
  }
}
