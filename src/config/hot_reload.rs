//! Config Hot-Reload - Admission Limits Without Restart
//!
//! Periodically re-reads config.toml. Only the `[admission]` section is
//! applied live (published on a `tokio::sync::watch` channel consumed by
//! the bet service); changes to any other section are logged and wait
//! for the next restart.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use super::AdmissionConfig;

/// Polls the config file and publishes admission limit changes.
pub struct ConfigWatcher {
    config_path: String,
    interval: Duration,
    admission_tx: watch::Sender<AdmissionConfig>,
    last_hash: Option<u64>,
}

impl ConfigWatcher {
    /// Create a watcher seeded with the limits loaded at startup.
    ///
    /// Returns the watcher and the receiver handed to the bet service.
    pub fn new(
        config_path: &str,
        initial: AdmissionConfig,
        interval: Duration,
    ) -> (Self, watch::Receiver<AdmissionConfig>) {
        let (admission_tx, admission_rx) = watch::channel(initial);
        let watcher = Self {
            config_path: config_path.to_string(),
            interval,
            admission_tx,
            last_hash: None,
        };
        (watcher, admission_rx)
    }

    /// Run until shutdown.
    #[instrument(skip(self, shutdown_rx), fields(path = %self.config_path))]
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(interval_secs = self.interval.as_secs(), "Config watcher started");
        self.last_hash = self.compute_hash().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Config watcher shutting down");
                    return Ok(());
                }
                () = tokio::time::sleep(self.interval) => {
                    self.check_and_reload().await;
                }
            }
        }
    }

    async fn check_and_reload(&mut self) {
        let new_hash = self.compute_hash().await;
        if new_hash == self.last_hash {
            debug!("Config unchanged");
            return;
        }

        match super::loader::load_config(&self.config_path) {
            Ok(new_config) => {
                self.last_hash = new_hash;
                self.apply(new_config.admission);
            }
            Err(e) => {
                warn!(error = %e, "Failed to reload config - keeping current limits");
            }
        }
    }

    /// Publish new limits if they differ from the current ones.
    fn apply(&self, admission: AdmissionConfig) {
        if *self.admission_tx.borrow() == admission {
            info!("Config changed outside [admission]; restart required to apply");
            return;
        }
        info!(
            min_amount = admission.min_amount,
            max_amount = admission.max_amount,
            daily_cap = ?admission.daily_cap,
            max_pool_share = ?admission.max_pool_share,
            "Admission limits reloaded"
        );
        self.admission_tx.send_replace(admission);
    }

    async fn compute_hash(&self) -> Option<u64> {
        let content = tokio::fs::read_to_string(&self.config_path).await.ok()?;
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Some(hasher.finish())
    }
}
