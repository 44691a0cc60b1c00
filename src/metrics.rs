// Prometheus metrics definitions for the arena backend.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Live-stream drivers currently running.
    pub static ref ACTIVE_STREAMS: IntGauge =
        IntGauge::new("arena_active_streams", "Live stream drivers currently running").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total battles created, by creation path (instant, challenge, matchmaking).
    pub static ref BATTLES_STARTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arena_battles_started_total", "Total battles created"),
        &["path"],
    )
    .unwrap();

    /// Total battles finalized.
    pub static ref BATTLES_COMPLETED_TOTAL: IntCounter = IntCounter::new(
        "arena_battles_completed_total",
        "Total battles finalized",
    )
    .unwrap();

    /// Total stream drivers that terminated with an error event.
    pub static ref STREAMS_ERRORED_TOTAL: IntCounter = IntCounter::new(
        "arena_streams_errored_total",
        "Stream drivers terminated by an error",
    )
    .unwrap();

    /// Total rate-limit denials, by limit kind.
    pub static ref RATE_LIMIT_DENIALS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arena_rate_limit_denials_total", "Total rate-limit denials"),
        &["kind"],
    )
    .unwrap();

    /// Total oracle calls that failed and were degraded locally, by operation.
    pub static ref ORACLE_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arena_oracle_failures_total", "Oracle calls degraded to a fallback"),
        &["op"],
    )
    .unwrap();

    /// Total fighters registered.
    pub static ref FIGHTER_REGISTRATIONS_TOTAL: IntCounter = IntCounter::new(
        "arena_fighter_registrations_total",
        "Fighters registered",
    )
    .unwrap();

    /// Total votes accepted.
    pub static ref VOTES_CAST_TOTAL: IntCounter = IntCounter::new(
        "arena_votes_cast_total",
        "Votes accepted",
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_STREAMS.clone()),
        Box::new(BATTLES_STARTED_TOTAL.clone()),
        Box::new(BATTLES_COMPLETED_TOTAL.clone()),
        Box::new(STREAMS_ERRORED_TOTAL.clone()),
        Box::new(RATE_LIMIT_DENIALS_TOTAL.clone()),
        Box::new(ORACLE_FAILURES_TOTAL.clone()),
        Box::new(FIGHTER_REGISTRATIONS_TOTAL.clone()),
        Box::new(VOTES_CAST_TOTAL.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_gather() {
        register_metrics();
        let output = gather_metrics();
        assert!(output.is_empty() || output.contains("arena_"));
    }

    #[test]
    fn test_metric_increments() {
        ACTIVE_STREAMS.set(1);
        assert_eq!(ACTIVE_STREAMS.get(), 1);
        ACTIVE_STREAMS.set(0);

        BATTLES_STARTED_TOTAL.with_label_values(&["instant"]).inc();
        BATTLES_COMPLETED_TOTAL.inc();
        STREAMS_ERRORED_TOTAL.inc();
        RATE_LIMIT_DENIALS_TOTAL
            .with_label_values(&["api_call"])
            .inc();
        ORACLE_FAILURES_TOTAL.with_label_values(&["judge"]).inc();
        FIGHTER_REGISTRATIONS_TOTAL.inc();
        VOTES_CAST_TOTAL.inc();
    }
}
