//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`. Every section
//! has serde defaults, so a minimal file (or none of a section) still
//! yields a runnable single-node setup: in-process locks, memory cache,
//! durable file-journal queue.

pub mod hot_reload;
pub mod loader;

use serde::Deserialize;

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  #[serde(default)]
  pub service: ServiceConfig,
  /// HTTP listener.
  #[serde(default)]
  pub server: ServerConfig,
  /// Ledger writer settings.
  #[serde(default)]
  pub ledger: LedgerConfig,
  /// Settlement orchestrator settings.
  #[serde(default)]
  pub settlement: SettlementConfig,
  /// Settlement job queue and retry policy.
  #[serde(default)]
  pub jobs: JobsConfig,
  /// Pool price cache.
  #[serde(default)]
  pub cache: CacheConfig,
  /// Bet admission limits (hot-reloadable).
  #[serde(default)]
  pub admission: AdmissionConfig,
  /// Snapshot and journal locations.
  #[serde(default)]
  pub persistence: PersistenceConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  #[serde(default = "default_name")]
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Bind address for API, health and metrics routes.
  #[serde(default = "default_bind_address")]
  pub bind_address: String,
}

/// Ledger writer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
  /// Maximum wait for a per-user lock (milliseconds).
  #[serde(default = "default_user_lock_wait")]
  pub lock_wait_ms: u64,
}

/// Settlement orchestrator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
  /// House fee taken off the total pool, in `[0, 1)`.
  #[serde(default)]
  pub fee_rate: f64,
  /// Maximum wait for a per-topic lock before reporting "in progress".
  #[serde(default = "default_topic_lock_wait")]
  pub lock_wait_ms: u64,
  /// Settler id recorded for sweep-initiated settlements.
  #[serde(default = "default_system_settler")]
  pub system_settler_id: String,
}

/// Queue backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
  /// File-journal backed queue with a worker pool.
  Durable,
  /// Single-shot in-process execution (degraded durability).
  InProcess,
}

/// Settlement job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
  /// Queue backend.
  #[serde(default = "default_queue_mode")]
  pub mode: QueueMode,
  /// Directory of the durable job journal.
  #[serde(default = "default_jobs_dir")]
  pub journal_dir: String,
  /// Concurrent settlement workers.
  #[serde(default = "default_concurrency")]
  pub concurrency: usize,
  /// Attempts per job, including the first.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  /// Fixed delay between attempts (milliseconds).
  #[serde(default = "default_backoff")]
  pub backoff_ms: u64,
  /// Recovery sweep period (seconds); 0 disables the sweep.
  #[serde(default = "default_sweep_interval")]
  pub sweep_interval_seconds: u64,
  /// Topics re-submitted per sweep.
  #[serde(default = "default_sweep_batch")]
  pub sweep_batch_size: usize,
}

/// Pool price cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Disable to always recompute from bets.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Snapshot lifetime in both tiers (seconds).
  #[serde(default = "default_cache_ttl")]
  pub ttl_seconds: u64,
  /// Base URL of the optional shared cache (`GET/PUT {url}/{key}`).
  #[serde(default)]
  pub remote_url: Option<String>,
  /// Timeout of remote cache calls (milliseconds).
  #[serde(default = "default_remote_timeout")]
  pub remote_timeout_ms: u64,
}

/// Bet admission limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdmissionConfig {
  /// Minimum stake per bet.
  #[serde(default = "default_min_amount")]
  pub min_amount: i64,
  /// Maximum stake per bet.
  #[serde(default = "default_max_amount")]
  pub max_amount: i64,
  /// Maximum total staked per user per UTC day.
  #[serde(default)]
  pub daily_cap: Option<i64>,
  /// Maximum post-bet share of a topic's pool (anti-whale).
  #[serde(default)]
  pub max_pool_share: Option<f64>,
  /// Consecutive losses that trigger a cooldown; 0 disables.
  #[serde(default = "default_loss_streak")]
  pub loss_streak_threshold: u32,
  /// Cooldown after the streak (seconds).
  #[serde(default = "default_cooldown")]
  pub cooldown_seconds: u64,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for snapshots and the ledger journal.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
  /// State snapshot interval (seconds).
  #[serde(default = "default_snapshot_interval")]
  pub snapshot_interval_seconds: u64,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      name: default_name(),
      log_level: default_log_level(),
    }
  }
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind_address: default_bind_address(),
    }
  }
}

impl Default for LedgerConfig {
  fn default() -> Self {
    Self {
      lock_wait_ms: default_user_lock_wait(),
    }
  }
}

impl Default for SettlementConfig {
  fn default() -> Self {
    Self {
      fee_rate: 0.0,
      lock_wait_ms: default_topic_lock_wait(),
      system_settler_id: default_system_settler(),
    }
  }
}

impl Default for JobsConfig {
  fn default() -> Self {
    Self {
      mode: default_queue_mode(),
      journal_dir: default_jobs_dir(),
      concurrency: default_concurrency(),
      max_attempts: default_max_attempts(),
      backoff_ms: default_backoff(),
      sweep_interval_seconds: default_sweep_interval(),
      sweep_batch_size: default_sweep_batch(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_seconds: default_cache_ttl(),
      remote_url: None,
      remote_timeout_ms: default_remote_timeout(),
    }
  }
}

impl Default for AdmissionConfig {
  fn default() -> Self {
    Self {
      min_amount: default_min_amount(),
      max_amount: default_max_amount(),
      daily_cap: None,
      max_pool_share: None,
      loss_streak_threshold: default_loss_streak(),
      cooldown_seconds: default_cooldown(),
    }
  }
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
      snapshot_interval_seconds: default_snapshot_interval(),
    }
  }
}

// Default value functions for serde

fn default_name() -> String {
  "point-ledger".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_bind_address() -> String {
  "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
  true
}

fn default_user_lock_wait() -> u64 {
  2_000
}

fn default_topic_lock_wait() -> u64 {
  500
}

fn default_system_settler() -> String {
  "system".to_string()
}

fn default_queue_mode() -> QueueMode {
  QueueMode::Durable
}

fn default_jobs_dir() -> String {
  "data/jobs".to_string()
}

fn default_concurrency() -> usize {
  4
}

fn default_max_attempts() -> u32 {
  3
}

fn default_backoff() -> u64 {
  1_000
}

fn default_sweep_interval() -> u64 {
  60
}

fn default_sweep_batch() -> usize {
  50
}

fn default_cache_ttl() -> u64 {
  10
}

fn default_remote_timeout() -> u64 {
  300
}

fn default_min_amount() -> i64 {
  1
}

fn default_max_amount() -> i64 {
  100_000
}

fn default_loss_streak() -> u32 {
  0
}

fn default_cooldown() -> u64 {
  1_800
}

fn default_data_dir() -> String {
  "data".to_string()
}

fn default_snapshot_interval() -> u64 {
  60
}
