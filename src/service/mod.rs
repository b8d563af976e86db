// ============================================================================
// Service Layer - lock gate and lifecycle orchestration
// ============================================================================
//
// The gate turns (order id, idempotency token) into an exclusively-held
// order; the lifecycle service drives state transitions while holding it and
// finalizes or releases the lock on every exit path. Thin controllers map
// the ServiceResponse envelope straight onto transport responses.
//
// ============================================================================

pub mod envelope;
pub mod lifecycle;
pub mod lock_gate;
pub mod ready_scan;

pub use envelope::{ErrorCategory, ServiceError, ServiceResponse};
pub use lifecycle::{CancelRequest, LifecycleService, ScanSummary};
pub use lock_gate::{GateError, LockGate, LockedOrder};
pub use ready_scan::ReadyScanWorker;
