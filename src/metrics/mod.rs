// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Lock protocol (acquisitions, contention, releases, forced unlocks)
// - Lifecycle transitions (by from/to status)
// - Ready-scan sweeps (claims, duration)
// - Collaborator dispatch (failures, payment circuit breaker)
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Lock Protocol Metrics
    pub locks_acquired: IntCounterVec,
    pub lock_contention: IntCounterVec,
    pub locks_force_cleared: IntCounter,

    // Lifecycle Metrics
    pub transitions: IntCounterVec,
    pub transitions_rejected: IntCounterVec,

    // Ready-Scan Metrics
    pub scan_orders_claimed: IntCounter,
    pub scan_duration: HistogramVec,

    // Collaborator Metrics
    pub collaborator_failures: IntCounterVec,
    pub payment_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Lock Protocol Metrics
        let locks_acquired = IntCounterVec::new(
            Opts::new("order_locks_acquired_total", "Order locks acquired"),
            &["path"],
        )?;
        registry.register(Box::new(locks_acquired.clone()))?;

        let lock_contention = IntCounterVec::new(
            Opts::new(
                "order_lock_contention_total",
                "Conditional writes that matched zero rows",
            ),
            &["path"],
        )?;
        registry.register(Box::new(lock_contention.clone()))?;

        let locks_force_cleared = IntCounter::new(
            "order_locks_force_cleared_total",
            "Locks cleared by administrative unlock-all",
        )?;
        registry.register(Box::new(locks_force_cleared.clone()))?;

        // Lifecycle Metrics
        let transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Committed status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let transitions_rejected = IntCounterVec::new(
            Opts::new(
                "order_transitions_rejected_total",
                "Transitions rejected by the state machine",
            ),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions_rejected.clone()))?;

        // Ready-Scan Metrics
        let scan_orders_claimed = IntCounter::new(
            "ready_scan_orders_claimed_total",
            "Orders claimed by ready-scan sweeps",
        )?;
        registry.register(Box::new(scan_orders_claimed.clone()))?;

        let scan_duration = HistogramVec::new(
            HistogramOpts::new("ready_scan_duration_seconds", "Ready-scan sweep duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(scan_duration.clone()))?;

        // Collaborator Metrics
        let collaborator_failures = IntCounterVec::new(
            Opts::new(
                "collaborator_failures_total",
                "Best-effort collaborator calls that failed",
            ),
            &["collaborator"],
        )?;
        registry.register(Box::new(collaborator_failures.clone()))?;

        let payment_breaker_state = IntGauge::new(
            "payment_breaker_state",
            "Payment circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(payment_breaker_state.clone()))?;

        Ok(Self {
            registry,
            locks_acquired,
            lock_contention,
            locks_force_cleared,
            transitions,
            transitions_rejected,
            scan_orders_claimed,
            scan_duration,
            collaborator_failures,
            payment_breaker_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_lock_acquired(&self, path: &str) {
        self.locks_acquired.with_label_values(&[path]).inc();
    }

    pub fn record_lock_contention(&self, path: &str) {
        self.lock_contention.with_label_values(&[path]).inc();
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.transitions.with_label_values(&[from, to]).inc();
    }

    pub fn record_transition_rejected(&self, from: &str, to: &str) {
        self.transitions_rejected.with_label_values(&[from, to]).inc();
    }

    pub fn record_scan(&self, claimed: u64, duration_secs: f64, success: bool) {
        self.scan_orders_claimed.inc_by(claimed);
        let outcome = if success { "ok" } else { "error" };
        self.scan_duration
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn record_collaborator_failure(&self, collaborator: &str) {
        self.collaborator_failures
            .with_label_values(&[collaborator])
            .inc();
    }

    pub fn set_payment_breaker_state(&self, state: u8) {
        self.payment_breaker_state.set(state as i64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
