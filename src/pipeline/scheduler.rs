//! Drain scheduler task
//!
//! Triggers a drain immediately, then every poll interval, and whenever the
//! processor is asked for an early drain. Each trigger runs as its own task
//! so a slow drain never delays the next tick; overlapping triggers collapse
//! into the processor's single-flight guard.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DrainOutcome, QueueProcessor};

/// Run until `cancel` fires. Returns the number of triggers issued.
pub async fn run_drain_scheduler(
    processor: Arc<QueueProcessor>,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> u64 {
    // First tick completes immediately
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut triggers = 0u64;

    info!(interval_secs = poll_interval.as_secs(), "[DrainScheduler] Task starting");

    loop {
        let reason = tokio::select! {
            () = cancel.cancelled() => {
                info!(triggers, "[DrainScheduler] Received shutdown signal");
                break;
            }
            _ = ticker.tick() => "interval",
            () = processor.drain_requested() => "wakeup",
        };

        triggers += 1;
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            match processor.run_drain_cycle().await {
                DrainOutcome::Drained(report) if report.described + report.failed > 0 => {
                    debug!(reason, ?report, "[DrainScheduler] Drain finished");
                }
                DrainOutcome::AlreadyRunning => {
                    debug!(reason, "[DrainScheduler] Trigger collapsed into running drain");
                }
                _ => {}
            }
        });
    }

    triggers
}
