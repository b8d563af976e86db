use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::clients::{
    CatalogClient, FulfillmentClient, NotificationClient, PaymentClient, ValidationIssue,
};
use crate::domain::order::{
    FulfillmentStatus, NewOrder, Order, OrderError, OrderStatus, Payment,
};
use crate::metrics::Metrics;
use crate::repository::{OrderPatch, OrderRepository, ReadyFilter};
use crate::utils::{retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryResult};

use super::envelope::{ErrorCategory, ServiceError, ServiceResponse};
use super::lock_gate::{GateError, LockGate, LockedOrder};

// ============================================================================
// Lifecycle Orchestrator
// ============================================================================
//
// Drives every state transition. The contract with the gate: once a
// LockedOrder exists, this service finalizes or releases the lock on EVERY
// exit path - either the final conditional write clears it together with the
// domain mutation, or `release_lock` runs before the error envelope is
// returned. A failed release is escalated as a storage error, never
// swallowed.
//
// Collaborators are isolated: payment capture is required for confirm and
// runs behind a circuit breaker while the lock is held; refunds,
// notifications and fulfillment re-emits after a committed transition are
// fire-and-forget and can never turn a committed transition into a reported
// failure.
//
// ============================================================================

pub struct LifecycleService {
    repo: Arc<dyn OrderRepository>,
    gate: LockGate,
    catalog: Arc<dyn CatalogClient>,
    payments: Arc<dyn PaymentClient>,
    notifications: Arc<dyn NotificationClient>,
    fulfillment: Arc<dyn FulfillmentClient>,
    payment_breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

/// Cancellation intent: who gets told and whether money flows back.
#[derive(Debug, Clone, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
    pub notify_customer: bool,
    pub refund: bool,
}

/// Outcome of one ready-scan sweep.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub claimed: u64,
    pub promoted: u64,
    pub failed: u64,
}

impl LifecycleService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogClient>,
        payments: Arc<dyn PaymentClient>,
        notifications: Arc<dyn NotificationClient>,
        fulfillment: Arc<dyn FulfillmentClient>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            gate: LockGate::new(repo.clone(), metrics.clone()),
            repo,
            catalog,
            payments,
            notifications,
            fulfillment,
            payment_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            metrics,
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    pub async fn create(&self, new: NewOrder) -> ServiceResponse<Order> {
        if let Err(e) = OrderError::check_cart(&new.cart) {
            return ServiceResponse::validation("invalid_cart", e.to_string());
        }

        let issues = match self.catalog.validate(&new.cart, &new.fulfillment).await {
            Ok(issues) => issues,
            Err(e) => {
                self.metrics.record_collaborator_failure("catalog");
                return ServiceResponse::collaborator("catalog_unavailable", e.to_string());
            }
        };
        if !issues.is_empty() {
            return ServiceResponse::errors(422, issues.into_iter().map(issue_error).collect());
        }

        match self.repo.create(new).await {
            Ok(order) => {
                tracing::info!(order_id = %order.id, "Order created");
                ServiceResponse::created(order)
            }
            Err(e) => ServiceResponse::storage(e.to_string()),
        }
    }

    /// Third-party ingestion: the upstream marketplace already validated
    /// availability, so only structural cart checks run here.
    pub async fn ingest(&self, batch: Vec<NewOrder>) -> ServiceResponse<Vec<Order>> {
        for new in &batch {
            if let Err(e) = OrderError::check_cart(&new.cart) {
                return ServiceResponse::validation("invalid_cart", e.to_string());
            }
        }
        match self.repo.bulk_create(batch).await {
            Ok(orders) => ServiceResponse::created(orders),
            Err(e) => ServiceResponse::storage(e.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Lock-guarded transitions
    // ------------------------------------------------------------------

    /// OPEN -> CONFIRMED. Captures payment while the lock is held; the
    /// status write and the lock release are one conditional write.
    pub async fn confirm(&self, id: Uuid, token: Option<&str>) -> ServiceResponse<Order> {
        let locked = match self
            .gate
            .acquire_with_status(id, OrderStatus::Open, token)
            .await
        {
            Ok(locked) => locked,
            Err(e) => return gate_rejection(e),
        };

        let capture = self
            .payment_breaker
            .call(self.payments.capture(locked.order()))
            .await;
        self.metrics
            .set_payment_breaker_state(self.payment_breaker.get_state().await.as_gauge());
        if let Err(e) = capture {
            self.metrics.record_collaborator_failure("payment");
            return self
                .reject_and_release(
                    &locked,
                    ServiceResponse::collaborator("payment_capture_failed", e.to_string()),
                )
                .await;
        }

        let mut fulfillment = locked.order().fulfillment.clone();
        fulfillment.status = FulfillmentStatus::Confirmed;
        // Record the capture so a later cancellation knows what to refund.
        let mut payments = locked.order().payments.clone();
        payments.push(Payment {
            id: Uuid::new_v4(),
            method: "card".to_string(),
            amount_cents: locked.order().total_cents(),
            captured: true,
        });
        let patch = OrderPatch {
            status: Some(OrderStatus::Confirmed),
            fulfillment: Some(fulfillment),
            payments: Some(payments),
            clear_lock: true,
            ..Default::default()
        };

        let response = self.commit(&locked, OrderStatus::Confirmed, patch).await;
        if let Some(order) = response.result.clone() {
            self.spawn_notification(order, None);
        }
        response
    }

    /// Any non-terminal status -> CANCELED. Refund and notification are
    /// delegated post-commit; their failures are logged, never propagated.
    pub async fn cancel(
        &self,
        id: Uuid,
        token: Option<&str>,
        request: CancelRequest,
    ) -> ServiceResponse<Order> {
        let locked = match self.gate.acquire(id, token).await {
            Ok(locked) => locked,
            Err(e) => return gate_rejection(e),
        };

        let from = locked.order().status;
        if let Err(e) = OrderError::check_transition(from, OrderStatus::Canceled) {
            self.metrics
                .record_transition_rejected(from.as_str(), OrderStatus::Canceled.as_str());
            return self
                .reject_and_release(
                    &locked,
                    ServiceResponse::validation("illegal_transition", e.to_string()),
                )
                .await;
        }

        let mut metadata = locked.order().metadata.clone();
        if let Some(reason) = &request.reason {
            metadata.insert("cancel_reason".to_string(), reason.clone());
        }
        let patch = OrderPatch {
            status: Some(OrderStatus::Canceled),
            metadata: Some(metadata),
            clear_lock: true,
            ..Default::default()
        };

        let response = self.commit(&locked, OrderStatus::Canceled, patch).await;
        if let Some(order) = response.result.clone() {
            if request.refund {
                self.spawn_refund(order.clone());
            }
            if request.notify_customer {
                self.spawn_notification(order, Some(request.reason.unwrap_or_default()));
            }
        }
        response
    }

    /// Moves the fulfillment slot under lock; status unchanged.
    pub async fn reschedule(
        &self,
        id: Uuid,
        token: Option<&str>,
        new_date: NaiveDate,
        new_time: NaiveTime,
    ) -> ServiceResponse<Order> {
        let locked = match self.gate.acquire(id, token).await {
            Ok(locked) => locked,
            Err(e) => return gate_rejection(e),
        };

        if locked.order().status.is_terminal() {
            return self
                .reject_and_release(
                    &locked,
                    ServiceResponse::validation(
                        "terminal_order",
                        format!("cannot reschedule a {} order", locked.order().status.as_str()),
                    ),
                )
                .await;
        }

        let mut fulfillment = locked.order().fulfillment.clone();
        fulfillment.selected_date = new_date;
        fulfillment.selected_time = new_time;

        // The new slot has to clear the same availability rules as creation.
        match self.catalog.validate(&locked.order().cart, &fulfillment).await {
            Ok(issues) if issues.is_empty() => {}
            Ok(issues) => {
                return self
                    .reject_and_release(
                        &locked,
                        ServiceResponse::errors(
                            422,
                            issues.into_iter().map(issue_error).collect(),
                        ),
                    )
                    .await;
            }
            Err(e) => {
                self.metrics.record_collaborator_failure("catalog");
                return self
                    .reject_and_release(
                        &locked,
                        ServiceResponse::collaborator("catalog_unavailable", e.to_string()),
                    )
                    .await;
            }
        }

        let patch = OrderPatch {
            fulfillment: Some(fulfillment),
            clear_lock: true,
            ..Default::default()
        };
        self.commit_without_transition(&locked, patch).await
    }

    /// Operational override: re-emit to fulfillment/printing with no domain
    /// change at all.
    pub async fn resend(&self, id: Uuid, token: Option<&str>) -> ServiceResponse<Order> {
        let locked = match self.gate.acquire(id, token).await {
            Ok(locked) => locked,
            Err(e) => return gate_rejection(e),
        };

        if let Err(e) = self.fulfillment.dispatch(locked.order()).await {
            self.metrics.record_collaborator_failure("fulfillment");
            return self
                .reject_and_release(
                    &locked,
                    ServiceResponse::collaborator("dispatch_failed", e.to_string()),
                )
                .await;
        }

        // Nothing to persist; just hand the lock back.
        match self.repo.release_lock(locked.id()).await {
            Ok(()) => ServiceResponse::ok(locked.order().clone()),
            Err(e) => ServiceResponse::storage(format!("lock release failed: {e}")),
        }
    }

    /// Operational override: re-emit and mark the fulfillment side as sent.
    pub async fn force_send(&self, id: Uuid, token: Option<&str>) -> ServiceResponse<Order> {
        let locked = match self.gate.acquire(id, token).await {
            Ok(locked) => locked,
            Err(e) => return gate_rejection(e),
        };

        if let Err(e) = self.fulfillment.dispatch(locked.order()).await {
            self.metrics.record_collaborator_failure("fulfillment");
            return self
                .reject_and_release(
                    &locked,
                    ServiceResponse::collaborator("dispatch_failed", e.to_string()),
                )
                .await;
        }

        let mut fulfillment = locked.order().fulfillment.clone();
        fulfillment.status = FulfillmentStatus::Sent;
        let patch = OrderPatch {
            fulfillment: Some(fulfillment),
            clear_lock: true,
            ..Default::default()
        };
        self.commit_without_transition(&locked, patch).await
    }

    /// PROCESSING -> COMPLETED.
    pub async fn complete(&self, id: Uuid, token: Option<&str>) -> ServiceResponse<Order> {
        let locked = match self
            .gate
            .acquire_with_status(id, OrderStatus::Processing, token)
            .await
        {
            Ok(locked) => locked,
            Err(e) => return gate_rejection(e),
        };

        let mut fulfillment = locked.order().fulfillment.clone();
        fulfillment.status = FulfillmentStatus::Fulfilled;
        let patch = OrderPatch {
            status: Some(OrderStatus::Completed),
            fulfillment: Some(fulfillment),
            clear_lock: true,
            ..Default::default()
        };
        self.commit(&locked, OrderStatus::Completed, patch).await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get(&self, id: Uuid) -> ServiceResponse<Order> {
        match self.repo.find_by_id(id).await {
            Ok(Some(order)) => ServiceResponse::ok(order),
            Ok(None) => ServiceResponse::not_found(),
            Err(e) => ServiceResponse::storage(e.to_string()),
        }
    }

    pub async fn list_by_status(&self, status: OrderStatus) -> ServiceResponse<Vec<Order>> {
        match self.repo.find_by_status(status).await {
            Ok(orders) => ServiceResponse::ok(orders),
            Err(e) => ServiceResponse::storage(e.to_string()),
        }
    }

    pub async fn list_by_fulfillment_date(&self, date: NaiveDate) -> ServiceResponse<Vec<Order>> {
        match self.repo.find_by_fulfillment_date(date).await {
            Ok(orders) => ServiceResponse::ok(orders),
            Err(e) => ServiceResponse::storage(e.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Batch and administrative
    // ------------------------------------------------------------------

    /// One sweep of the ready-scan: atomically claim every due order under a
    /// fresh sweep token, then promote each claimed order to PROCESSING.
    /// Claiming is bulk-atomic per row, so a racing sweep or a live
    /// per-order request can never hold the same order.
    pub async fn ready_scan(&self) -> ServiceResponse<ScanSummary> {
        let started = Instant::now();
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let filter = ReadyFilter {
            status: OrderStatus::Confirmed,
            fulfillment_status: FulfillmentStatus::Confirmed,
            selected_date: now.date_naive(),
            max_selected_time: now.time(),
        };

        let claimed = match self.repo.lock_ready_orders(filter, &token).await {
            Ok(claimed) => claimed,
            Err(e) => {
                self.metrics.record_scan(0, started.elapsed().as_secs_f64(), false);
                return ServiceResponse::storage(e.to_string());
            }
        };
        self.metrics
            .locks_acquired
            .with_label_values(&["scan"])
            .inc_by(claimed);

        // Recover the claimed set by token: the same query resumes a sweep
        // that crashed between claiming and processing.
        let orders = match self.repo.find_by_lock(&token).await {
            Ok(orders) => orders,
            Err(e) => {
                self.metrics.record_scan(claimed, started.elapsed().as_secs_f64(), false);
                return ServiceResponse::storage(e.to_string());
            }
        };

        let results = futures_util::future::join_all(
            orders.iter().map(|order| self.promote_claimed(order, &token)),
        )
        .await;
        let promoted = results.iter().filter(|r| r.is_ok()).count() as u64;
        let failed = results.len() as u64 - promoted;

        self.metrics
            .record_scan(claimed, started.elapsed().as_secs_f64(), true);
        if claimed > 0 {
            tracing::info!(claimed, promoted, failed, "Ready-scan sweep finished");
        }
        ServiceResponse::ok(ScanSummary {
            claimed,
            promoted,
            failed,
        })
    }

    /// Administrative recovery after a stuck lock. Bypasses the state
    /// machine entirely; never part of the steady-state flow.
    pub async fn unlock_all(&self) -> ServiceResponse<u64> {
        match self.repo.unlock_all().await {
            Ok(cleared) => {
                self.metrics.locks_force_cleared.inc_by(cleared);
                ServiceResponse::ok(cleared)
            }
            Err(e) => ServiceResponse::storage(e.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn promote_claimed(&self, order: &Order, token: &str) -> anyhow::Result<()> {
        if let Err(e) = self.fulfillment.dispatch(order).await {
            self.metrics.record_collaborator_failure("fulfillment");
            tracing::warn!(order_id = %order.id, error = %e, "Dispatch failed, releasing claimed order");
            self.repo.release_lock(order.id).await?;
            return Err(e);
        }

        let mut fulfillment = order.fulfillment.clone();
        fulfillment.status = FulfillmentStatus::Sent;
        let patch = OrderPatch {
            status: Some(OrderStatus::Processing),
            fulfillment: Some(fulfillment),
            clear_lock: true,
            ..Default::default()
        };

        match self.repo.update_with_lock(order.id, Some(token), patch).await {
            Ok(Some(_)) => {
                self.metrics.record_transition(
                    OrderStatus::Confirmed.as_str(),
                    OrderStatus::Processing.as_str(),
                );
                Ok(())
            }
            // Only an administrative unlock can take a claimed lock away.
            Ok(None) => anyhow::bail!("claimed order {} lost its lock mid-sweep", order.id),
            Err(e) => {
                if let Err(release_err) = self.repo.release_lock(order.id).await {
                    tracing::error!(order_id = %order.id, error = %release_err, "Lock release failed after sweep error");
                }
                Err(e)
            }
        }
    }

    /// Persist a status transition and clear the lock in one conditional
    /// write, then record the committed transition.
    async fn commit(
        &self,
        locked: &LockedOrder,
        to: OrderStatus,
        patch: OrderPatch,
    ) -> ServiceResponse<Order> {
        let from = locked.order().status;
        match self
            .repo
            .update_with_lock(locked.id(), Some(locked.token()), patch)
            .await
        {
            Ok(Some(order)) => {
                self.metrics.record_transition(from.as_str(), to.as_str());
                tracing::info!(order_id = %order.id, from = from.as_str(), to = to.as_str(), "Order transition committed");
                ServiceResponse::ok(order)
            }
            // The CAS missed: our token is gone (administrative unlock raced
            // us). There is nothing left to release.
            Ok(None) => ServiceResponse::not_found_or_locked(),
            Err(e) => {
                self.reject_and_release(locked, ServiceResponse::storage(e.to_string()))
                    .await
            }
        }
    }

    async fn commit_without_transition(
        &self,
        locked: &LockedOrder,
        patch: OrderPatch,
    ) -> ServiceResponse<Order> {
        match self
            .repo
            .update_with_lock(locked.id(), Some(locked.token()), patch)
            .await
        {
            Ok(Some(order)) => ServiceResponse::ok(order),
            Ok(None) => ServiceResponse::not_found_or_locked(),
            Err(e) => {
                self.reject_and_release(locked, ServiceResponse::storage(e.to_string()))
                    .await
            }
        }
    }

    /// The invariant behind every rejection after acquisition: the lock is
    /// handed back before the envelope leaves this service. A failed release
    /// is the one condition that upgrades the response to a storage error,
    /// because the order is now stuck until an administrative unlock.
    async fn reject_and_release(
        &self,
        locked: &LockedOrder,
        response: ServiceResponse<Order>,
    ) -> ServiceResponse<Order> {
        match self.repo.release_lock(locked.id()).await {
            Ok(()) => response,
            Err(e) => {
                tracing::error!(order_id = %locked.id(), error = %e, "Lock release failed; order requires administrative unlock");
                ServiceResponse::storage(format!("lock release failed: {e}"))
            }
        }
    }

    fn spawn_notification(&self, order: Order, cancel_reason: Option<String>) {
        let notifications = self.notifications.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let result = retry_with_backoff(RetryConfig::best_effort(), |_attempt| {
                let notifications = notifications.clone();
                let order = order.clone();
                let cancel_reason = cancel_reason.clone();
                async move {
                    match &cancel_reason {
                        Some(reason) => notifications.order_canceled(&order, reason).await,
                        None => notifications.order_confirmed(&order).await,
                    }
                }
            })
            .await;

            if let RetryResult::Failed(e) = result {
                metrics.record_collaborator_failure("notification");
                tracing::warn!(order_id = %order.id, error = %e, "Notification dispatch abandoned");
            }
        });
    }

    fn spawn_refund(&self, order: Order) {
        let payments = self.payments.clone();
        let metrics = self.metrics.clone();
        let amount: i64 = order
            .payments
            .iter()
            .filter(|p| p.captured)
            .map(|p| p.amount_cents)
            .sum();
        if amount == 0 {
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = payments.refund(&order, amount).await {
                metrics.record_collaborator_failure("payment");
                tracing::warn!(order_id = %order.id, amount_cents = amount, error = %e, "Refund dispatch failed; queued for manual follow-up");
            }
        });
    }
}

fn gate_rejection<T>(err: GateError) -> ServiceResponse<T> {
    match err {
        GateError::MissingToken => ServiceResponse::missing_token(),
        GateError::NotFoundOrLocked => ServiceResponse::not_found_or_locked(),
        GateError::Storage(e) => ServiceResponse::storage(e.to_string()),
    }
}

fn issue_error(issue: ValidationIssue) -> ServiceError {
    ServiceError::new(
        ErrorCategory::Validation,
        "catalog_rejected",
        format!("{}: {}", issue.field, issue.message),
    )
}
