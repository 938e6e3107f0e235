use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, ExpireOutcome};
use crate::model::Ms;
use crate::observability::SWEEP_BOOKINGS_TOTAL;

/// What a sweep pass needs from the booking store.
#[async_trait]
pub trait Expiry: Send + Sync {
    fn now(&self) -> Ms;

    /// Up to `limit` requested bookings whose deadline is at or before `now`.
    fn due(&self, now: Ms, limit: usize) -> Vec<Ulid>;

    async fn expire(&self, booking_id: Ulid) -> Result<ExpireOutcome, EngineError>;
}

#[async_trait]
impl Expiry for Engine {
    fn now(&self) -> Ms {
        Engine::now(self)
    }

    fn due(&self, now: Ms, limit: usize) -> Vec<Ulid> {
        self.collect_expired_bookings(now, limit)
    }

    async fn expire(&self, booking_id: Ulid) -> Result<ExpireOutcome, EngineError> {
        Engine::expire(self, booking_id).await
    }
}

/// Per-pass tally. Serialized as the cron endpoint's response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    #[serde(rename = "expiredCount")]
    pub expired: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Expire up to `batch` lapsed bookings. Each booking is its own transition;
/// one failure is logged and counted and the pass moves on.
pub async fn sweep_once(engine: &impl Expiry, batch: usize) -> SweepReport {
    let mut report = SweepReport::default();
    for booking_id in engine.due(engine.now(), batch) {
        match engine.expire(booking_id).await {
            Ok(ExpireOutcome::Expired) => {
                report.expired += 1;
                metrics::counter!(SWEEP_BOOKINGS_TOTAL, "outcome" => "expired").increment(1);
            }
            Ok(ExpireOutcome::Skipped) => {
                // Decided or expired by someone else since the scan.
                report.skipped += 1;
                metrics::counter!(SWEEP_BOOKINGS_TOTAL, "outcome" => "skipped").increment(1);
            }
            Err(e) => {
                warn!(%booking_id, "sweep: expire failed: {e}");
                report.failed += 1;
                metrics::counter!(SWEEP_BOOKINGS_TOTAL, "outcome" => "failed").increment(1);
            }
        }
    }
    if report.expired + report.skipped + report.failed > 0 {
        info!(
            expired = report.expired,
            skipped = report.skipped,
            failed = report.failed,
            "sweep pass finished"
        );
    }
    report
}

/// Periodic expiry sweep.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration, batch: usize) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        sweep_once(engine.as_ref(), batch).await;
    }
}

/// Compact the WAL once enough appends have piled up since the last rewrite.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        debug!(appends, threshold, "compacting wal");
        if let Err(e) = engine.compact_wal().await {
            warn!("wal compaction failed: {e}");
        }
    }
}
