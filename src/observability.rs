use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine transitions. Labels: transition, outcome.
pub const TRANSITIONS_TOTAL: &str = "tutorslot_transitions_total";

/// Histogram: transition latency in seconds, lock wait and WAL commit included.
/// Labels: transition.
pub const TRANSITION_DURATION_SECONDS: &str = "tutorslot_transition_duration_seconds";

/// Counter: HTTP requests. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "tutorslot_http_requests_total";

// ── Background work ─────────────────────────────────────────────

/// Counter: bookings visited by the sweeper. Labels: outcome (expired, skipped, failed).
pub const SWEEP_BOOKINGS_TOTAL: &str = "tutorslot_sweep_bookings_total";

/// Counter: notifications handed to the notifier. Labels: outcome.
pub const NOTIFICATIONS_TOTAL: &str = "tutorslot_notifications_total";

/// Counter: notifications dropped before delivery (outbox full or closed).
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "tutorslot_notifications_dropped_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: slots currently in the store.
pub const SLOTS_ACTIVE: &str = "tutorslot_slots_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tutorslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tutorslot_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over the default `info` filter.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Count one finished transition and its latency.
pub fn record_transition<T>(transition: &'static str, result: &Result<T, EngineError>, started: Instant) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind().label(),
    };
    metrics::counter!(TRANSITIONS_TOTAL, "transition" => transition, "outcome" => outcome).increment(1);
    metrics::histogram!(TRANSITION_DURATION_SECONDS, "transition" => transition)
        .record(started.elapsed().as_secs_f64());
}
