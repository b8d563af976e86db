use std::sync::Arc;
use uuid::Uuid;

use crate::domain::order::{Order, OrderStatus};
use crate::metrics::Metrics;
use crate::repository::OrderRepository;

// ============================================================================
// Lock Acquisition Gate
// ============================================================================
//
// Sits in front of every mutating operation that needs exclusive access.
// It knows no business rules: its only job is to turn (order id, caller
// idempotency token) into an exclusively-held order via the store's
// compare-and-set, or to reject the request.
//
// The locked order is handed back by value. There is no shared
// request-context stash; downstream code receives the proof of exclusivity
// explicitly.
//
// ============================================================================

/// Proof that the wrapped order was locked with `token` by this caller.
/// Constructed only by the gate.
#[derive(Debug, Clone)]
pub struct LockedOrder {
    order: Order,
    token: String,
}

impl LockedOrder {
    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn id(&self) -> Uuid {
        self.order.id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Missing precondition: requests without an idempotency token are
    /// rejected before touching storage.
    #[error("idempotency token is required")]
    MissingToken,

    /// Contention or absence; deliberately ambiguous so the gate does not
    /// leak whether the order exists.
    #[error("order not found or already locked")]
    NotFoundOrLocked,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct LockGate {
    repo: Arc<dyn OrderRepository>,
    metrics: Arc<Metrics>,
}

impl LockGate {
    pub fn new(repo: Arc<dyn OrderRepository>, metrics: Arc<Metrics>) -> Self {
        Self { repo, metrics }
    }

    /// Exclusive acquisition for transitions legal from several statuses.
    pub async fn acquire(
        &self,
        id: Uuid,
        token: Option<&str>,
    ) -> Result<LockedOrder, GateError> {
        let token = token.ok_or(GateError::MissingToken)?.to_string();

        match self.repo.try_acquire_lock(id, &token).await? {
            Some(order) => {
                self.metrics.record_lock_acquired("request");
                tracing::debug!(order_id = %id, "Lock acquired");
                Ok(LockedOrder { order, token })
            }
            None => {
                self.metrics.record_lock_contention("request");
                tracing::debug!(order_id = %id, "Lock contention or unknown order");
                Err(GateError::NotFoundOrLocked)
            }
        }
    }

    /// Exclusive acquisition that additionally requires the order to be in
    /// `expected_status`, enforced inside the same compare-and-set.
    pub async fn acquire_with_status(
        &self,
        id: Uuid,
        expected_status: OrderStatus,
        token: Option<&str>,
    ) -> Result<LockedOrder, GateError> {
        let token = token.ok_or(GateError::MissingToken)?.to_string();

        match self.repo.acquire_lock(id, expected_status, &token).await? {
            Some(order) => {
                self.metrics.record_lock_acquired("request");
                tracing::debug!(order_id = %id, status = expected_status.as_str(), "Lock acquired");
                Ok(LockedOrder { order, token })
            }
            None => {
                self.metrics.record_lock_contention("request");
                Err(GateError::NotFoundOrLocked)
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{
        Fulfillment, FulfillmentDetails, FulfillmentStatus, NewOrder, ServiceType,
    };
    use crate::repository::MemoryOrderRepository;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::HashMap;

    async fn gate_with_order() -> (LockGate, Arc<MemoryOrderRepository>, Uuid) {
        let repo = Arc::new(MemoryOrderRepository::new());
        let gate = LockGate::new(repo.clone(), Arc::new(Metrics::new().unwrap()));
        let order = repo
            .create(NewOrder {
                fulfillment: Fulfillment {
                    service_type: ServiceType::Pickup,
                    status: FulfillmentStatus::Pending,
                    selected_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
                    selected_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                    details: FulfillmentDetails::default(),
                },
                cart: vec![],
                discounts: vec![],
                taxes: vec![],
                tip_cents: None,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        (gate, repo, order.id)
    }

    #[tokio::test]
    async fn test_missing_token_rejected_before_storage() {
        let (gate, _repo, id) = gate_with_order().await;
        let err = gate.acquire(id, None).await.unwrap_err();
        assert!(matches!(err, GateError::MissingToken));
    }

    #[tokio::test]
    async fn test_acquire_returns_locked_order() {
        let (gate, _repo, id) = gate_with_order().await;
        let locked = gate.acquire(id, Some("tok-1")).await.unwrap();
        assert_eq!(locked.id(), id);
        assert_eq!(locked.token(), "tok-1");
        assert_eq!(locked.order().lock.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_second_acquire_is_ambiguously_rejected() {
        let (gate, _repo, id) = gate_with_order().await;
        gate.acquire(id, Some("tok-1")).await.unwrap();

        let held = gate.acquire(id, Some("tok-2")).await.unwrap_err();
        let absent = gate.acquire(Uuid::new_v4(), Some("tok-2")).await.unwrap_err();
        // Same signal for "held" and "does not exist".
        assert!(matches!(held, GateError::NotFoundOrLocked));
        assert!(matches!(absent, GateError::NotFoundOrLocked));
    }

    #[tokio::test]
    async fn test_status_constrained_acquire() {
        let (gate, _repo, id) = gate_with_order().await;
        let err = gate
            .acquire_with_status(id, OrderStatus::Confirmed, Some("tok-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::NotFoundOrLocked));

        let locked = gate
            .acquire_with_status(id, OrderStatus::Open, Some("tok-1"))
            .await
            .unwrap();
        assert_eq!(locked.order().status, OrderStatus::Open);
    }
}
