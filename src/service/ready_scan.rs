use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::lifecycle::LifecycleService;

// ============================================================================
// Ready-Scan Worker - periodic sweep of due orders
// ============================================================================
//
// Drives LifecycleService::ready_scan on a fixed interval. The sweep itself
// carries all the concurrency guarantees (per-row atomic claims under a
// fresh sweep token), so the worker is just a clock: it never inspects
// orders and never holds state between ticks.
//
// Multiple instances may run against the same store. Each tick mints its
// own token, so overlapping sweeps partition the due set instead of
// double-processing it.
//
// ============================================================================

pub struct ReadyScanWorker {
    service: Arc<LifecycleService>,
    interval_secs: u64,
}

impl ReadyScanWorker {
    pub fn new(service: Arc<LifecycleService>, interval_secs: u64) -> Self {
        Self {
            service,
            interval_secs,
        }
    }

    /// Run forever. Spawn this on its own task; a failed sweep is logged and
    /// the next tick retries from scratch.
    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval_secs,
            "Ready-scan worker started"
        );

        loop {
            ticker.tick().await;

            let response = self.service.ready_scan().await;
            if !response.success {
                for error in &response.errors {
                    tracing::error!(code = %error.code, detail = %error.detail, "Ready-scan sweep failed");
                }
            }
        }
    }
}
