//! Health State - Liveness and Readiness Probes
//!
//! Shared flags behind the `/live` and `/ready` routes. Readiness depends
//! on store health and on the settlement queue having started; the API
//! router mounts the handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::ports::store::LedgerStore;

/// Shared health state polled by readiness probes.
#[derive(Clone)]
pub struct HealthState {
    /// Store probed on every readiness check.
    store: Arc<dyn LedgerStore>,
    /// Whether the settlement queue is accepting jobs.
    pub queue_running: Arc<AtomicBool>,
    /// Flipped off when shutdown begins.
    pub accepting: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            queue_running: Arc::new(AtomicBool::new(false)),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Check if the service is ready to serve traffic.
    pub async fn is_ready(&self) -> bool {
        self.accepting.load(Ordering::Relaxed)
            && self.queue_running.load(Ordering::Relaxed)
            && self.store.is_healthy().await
    }
}

/// `/live` and `/ready` routes bound to `state`.
pub fn routes(state: HealthState) -> Router {
    Router::new()
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .with_state(state)
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness probe: returns 200 only if store and queue are healthy.
async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
    if state.is_ready().await {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::MemoryStore;

    #[tokio::test]
    async fn test_ready_requires_running_queue() {
        let health = HealthState::new(Arc::new(MemoryStore::new()));
        assert!(!health.is_ready().await);

        health.queue_running.store(true, Ordering::Relaxed);
        assert!(health.is_ready().await);

        health.accepting.store(false, Ordering::Relaxed);
        assert!(!health.is_ready().await);
    }
}
