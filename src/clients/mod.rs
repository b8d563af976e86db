use anyhow::Result;
use async_trait::async_trait;

use crate::domain::order::{CartLine, Fulfillment, Order};

// ============================================================================
// Collaborator Interfaces
// ============================================================================
//
// Narrow ports for everything the lifecycle core consumes but does not own:
// catalog validation, payments, notifications, and fulfillment dispatch
// (kitchen printing / courier handoff). Wire protocols, auth and templating
// live behind these traits in other services.
//
// Payment failures are surfaced to callers; catalog failures block creation;
// notification and dispatch failures are best-effort and never fail a
// committed transition.
//
// ============================================================================

/// One rejected aspect of an incoming order, as reported by the catalog /
/// availability service.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Validates cart contents and the fulfillment window. An empty issue
    /// list means the order may be created.
    async fn validate(&self, cart: &[CartLine], fulfillment: &Fulfillment)
        -> Result<Vec<ValidationIssue>>;
}

#[async_trait]
pub trait PaymentClient: Send + Sync {
    /// Capture the order total against the authorization held for this
    /// order id.
    async fn capture(&self, order: &Order) -> Result<()>;

    /// Refund to the original payment method.
    async fn refund(&self, order: &Order, amount_cents: i64) -> Result<()>;
}

#[async_trait]
pub trait NotificationClient: Send + Sync {
    async fn order_confirmed(&self, order: &Order) -> Result<()>;

    async fn order_canceled(&self, order: &Order, reason: &str) -> Result<()>;
}

#[async_trait]
pub trait FulfillmentClient: Send + Sync {
    /// Emit the order to the fulfillment side (kitchen printer, courier
    /// dispatch, third-party marketplace ack).
    async fn dispatch(&self, order: &Order) -> Result<()>;
}

// ============================================================================
// Logging no-op implementations (wiring defaults)
// ============================================================================
//
// Stand-ins used until the real integrations are wired in; they accept
// everything and log at debug so local runs show the call flow.
//
// ============================================================================

pub struct NoopCatalogClient;

#[async_trait]
impl CatalogClient for NoopCatalogClient {
    async fn validate(
        &self,
        cart: &[CartLine],
        fulfillment: &Fulfillment,
    ) -> Result<Vec<ValidationIssue>> {
        tracing::debug!(
            lines = cart.len(),
            date = %fulfillment.selected_date,
            "Catalog validation skipped (noop client)"
        );
        Ok(Vec::new())
    }
}

pub struct NoopPaymentClient;

#[async_trait]
impl PaymentClient for NoopPaymentClient {
    async fn capture(&self, order: &Order) -> Result<()> {
        tracing::debug!(order_id = %order.id, total = order.total_cents(), "Payment capture skipped (noop client)");
        Ok(())
    }

    async fn refund(&self, order: &Order, amount_cents: i64) -> Result<()> {
        tracing::debug!(order_id = %order.id, amount_cents, "Refund skipped (noop client)");
        Ok(())
    }
}

pub struct NoopNotificationClient;

#[async_trait]
impl NotificationClient for NoopNotificationClient {
    async fn order_confirmed(&self, order: &Order) -> Result<()> {
        tracing::debug!(order_id = %order.id, "Confirmation notification skipped (noop client)");
        Ok(())
    }

    async fn order_canceled(&self, order: &Order, reason: &str) -> Result<()> {
        tracing::debug!(order_id = %order.id, reason, "Cancellation notification skipped (noop client)");
        Ok(())
    }
}

pub struct NoopFulfillmentClient;

#[async_trait]
impl FulfillmentClient for NoopFulfillmentClient {
    async fn dispatch(&self, order: &Order) -> Result<()> {
        tracing::debug!(order_id = %order.id, "Fulfillment dispatch skipped (noop client)");
        Ok(())
    }
}
