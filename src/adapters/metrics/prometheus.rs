//! Prometheus Metrics Registry - Ledger & Settlement Observability
//!
//! Registers the `point_ledger_*` metric families and renders them for the
//! `/metrics` route. Covers ledger write outcomes, admission rejections,
//! settlement runs, payout volume, job attempts and pool cache hit rates.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Centralized Prometheus metrics for the engine.
///
/// Constructed once in `main` and shared as `Arc<ServiceMetrics>`.
pub struct ServiceMetrics {
    /// Prometheus registry.
    registry: Registry,
    /// Ledger writes by entry type and outcome.
    pub ledger_writes: IntCounterVec,
    /// Bet admission rejections by reason code.
    pub admission_rejections: IntCounterVec,
    /// Settlement and refund runs by kind and outcome.
    pub settlement_runs: IntCounterVec,
    /// Points credited by settlement payouts.
    pub payout_points: IntCounter,
    /// Settlement run latency in milliseconds.
    pub settlement_latency_ms: HistogramVec,
    /// Job attempts by backend and outcome.
    pub job_attempts: IntCounterVec,
    /// Pool cache lookups by tier and result.
    pub cache_lookups: IntCounterVec,
}

impl ServiceMetrics {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ledger_writes = IntCounterVec::new(
            Opts::new("point_ledger_ledger_writes_total", "Ledger writes by type and outcome"),
            &["entry_type", "outcome"],
        )?;

        let admission_rejections = IntCounterVec::new(
            Opts::new(
                "point_ledger_admission_rejections_total",
                "Bets rejected by the admission policy",
            ),
            &["reason"],
        )?;

        let settlement_runs = IntCounterVec::new(
            Opts::new(
                "point_ledger_settlement_runs_total",
                "Settlement and refund runs by outcome",
            ),
            &["kind", "outcome"],
        )?;

        let payout_points = IntCounter::new(
            "point_ledger_payout_points_total",
            "Points credited by settlement payouts",
        )?;

        let settlement_latency_ms = HistogramVec::new(
            HistogramOpts::new(
                "point_ledger_settlement_latency_ms",
                "Settlement run latency in milliseconds",
            )
            .buckets(vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]),
            &["kind"],
        )?;

        let job_attempts = IntCounterVec::new(
            Opts::new("point_ledger_job_attempts_total", "Settlement job attempts"),
            &["backend", "outcome"],
        )?;

        let cache_lookups = IntCounterVec::new(
            Opts::new("point_ledger_pool_cache_lookups_total", "Pool cache lookups"),
            &["tier", "result"],
        )?;

        registry.register(Box::new(ledger_writes.clone()))?;
        registry.register(Box::new(admission_rejections.clone()))?;
        registry.register(Box::new(settlement_runs.clone()))?;
        registry.register(Box::new(payout_points.clone()))?;
        registry.register(Box::new(settlement_latency_ms.clone()))?;
        registry.register(Box::new(job_attempts.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;

        Ok(Self {
            registry,
            ledger_writes,
            admission_rejections,
            settlement_runs,
            payout_points,
            settlement_latency_ms,
            job_attempts,
            cache_lookups,
        })
    }

    /// Render all families in the Prometheus text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_families() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics
            .ledger_writes
            .with_label_values(&["BET_PLACE", "applied"])
            .inc();
        metrics.payout_points.inc_by(600);

        let text = metrics.render().unwrap();
        assert!(text.contains("point_ledger_ledger_writes_total"));
        assert!(text.contains("point_ledger_payout_points_total 600"));
    }
}
