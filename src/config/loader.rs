//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{AppConfig, QueueMode};

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    queue_mode = ?config.jobs.mode,
    concurrency = config.jobs.concurrency,
    fee_rate = config.settlement.fee_rate,
    remote_cache = config.cache.remote_url.is_some(),
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content)
    .with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  // Settlement
  anyhow::ensure!(
    config.settlement.fee_rate >= 0.0 && config.settlement.fee_rate < 1.0,
    "settlement.fee_rate must be in [0, 1), got {}",
    config.settlement.fee_rate
  );
  anyhow::ensure!(
    !config.settlement.system_settler_id.is_empty(),
    "settlement.system_settler_id must not be empty"
  );

  // Jobs
  anyhow::ensure!(
    config.jobs.concurrency > 0,
    "jobs.concurrency must be positive"
  );
  anyhow::ensure!(
    config.jobs.max_attempts > 0,
    "jobs.max_attempts must be at least 1"
  );
  if config.jobs.mode == QueueMode::Durable {
    anyhow::ensure!(
      !config.jobs.journal_dir.is_empty(),
      "jobs.journal_dir must be set for the durable queue"
    );
  }

  // Cache
  anyhow::ensure!(
    config.cache.ttl_seconds > 0,
    "cache.ttl_seconds must be positive"
  );
  if let Some(url) = &config.cache.remote_url {
    anyhow::ensure!(
      url.starts_with("http://") || url.starts_with("https://"),
      "cache.remote_url must be an http(s) URL, got {url}"
    );
  }

  // Admission
  let admission = &config.admission;
  anyhow::ensure!(
    admission.min_amount > 0,
    "admission.min_amount must be positive, got {}",
    admission.min_amount
  );
  anyhow::ensure!(
    admission.max_amount >= admission.min_amount,
    "admission.max_amount ({}) must be >= min_amount ({})",
    admission.max_amount,
    admission.min_amount
  );
  if let Some(cap) = admission.daily_cap {
    anyhow::ensure!(cap > 0, "admission.daily_cap must be positive");
  }
  if let Some(share) = admission.max_pool_share {
    anyhow::ensure!(
      share > 0.0 && share <= 1.0,
      "admission.max_pool_share must be in (0, 1], got {share}"
    );
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = parse_config("").unwrap();
    assert_eq!(config.jobs.mode, QueueMode::Durable);
    assert_eq!(config.jobs.concurrency, 4);
    assert_eq!(config.jobs.max_attempts, 3);
    assert_eq!(config.cache.ttl_seconds, 10);
    assert!(config.cache.remote_url.is_none());
  }

  #[test]
  fn test_sections_override_defaults() {
    let config = parse_config(
      r#"
      [jobs]
      mode = "in_process"
      backoff_ms = 50

      [admission]
      min_amount = 10
      max_amount = 500
      daily_cap = 2000
      max_pool_share = 0.4
      loss_streak_threshold = 5
      "#,
    )
    .unwrap();
    assert_eq!(config.jobs.mode, QueueMode::InProcess);
    assert_eq!(config.jobs.backoff_ms, 50);
    assert_eq!(config.admission.daily_cap, Some(2000));
    assert_eq!(config.admission.loss_streak_threshold, 5);
  }

  #[test]
  fn test_rejects_bad_fee_rate() {
    let err = parse_config("[settlement]\nfee_rate = 1.5\n").unwrap_err();
    assert!(err.to_string().contains("fee_rate"));
  }

  #[test]
  fn test_rejects_inverted_bounds() {
    let result = parse_config("[admission]\nmin_amount = 100\nmax_amount = 10\n");
    assert!(result.is_err());
  }
}
