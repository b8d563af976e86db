use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::order::{
    CartLine, Discount, Fulfillment, FulfillmentStatus, NewOrder, Order, OrderStatus, Payment,
    Refund, TaxLine,
};

pub mod memory;
pub mod postgres;
pub mod scylla;

pub use memory::MemoryOrderRepository;
pub use postgres::PgOrderRepository;
pub use scylla::ScyllaOrderRepository;

// ============================================================================
// Order Repository Contract
// ============================================================================
//
// Storage-agnostic interface over the order store. Every conditional
// operation is a single compare-and-set at the storage layer - adapters must
// NEVER read current state, decide in application code, and then write
// unconditionally, because the whole point of this contract is that the
// contention check and the write are indivisible.
//
// Error convention:
// - Expected contention (precondition did not match) is Ok(None) / Ok(0).
// - Infrastructure faults (connectivity, constraint violation) are Err.
//
// Locks carry no TTL: a holder that crashes leaves its order locked until an
// operator runs `unlock_all`. A lease timestamp in the CAS filter would
// close that gap but changes observable behavior, so it is left out here.
//
// ============================================================================

#[async_trait]
pub trait OrderRepository: Send + Sync {
    // --- reads (no locking semantics) ---

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>>;

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    async fn find_by_fulfillment_date(&self, date: NaiveDate) -> Result<Vec<Order>>;

    async fn find_by_created_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>>;

    /// Recovery query: everything a given token already holds. Lets a caller
    /// resume after a crash mid-transition instead of double-claiming.
    async fn find_by_lock(&self, token: &str) -> Result<Vec<Order>>;

    // --- creation ---

    /// Assigns identity; the new order is `OPEN` and unlocked.
    async fn create(&self, new: NewOrder) -> Result<Order>;

    /// Third-party ingestion path. Every created order starts unlocked.
    async fn bulk_create(&self, new: Vec<NewOrder>) -> Result<Vec<Order>>;

    // --- conditional lock protocol ---

    /// Compare-and-set `lock: null -> token`. Returns the post-update row on
    /// success, None when another holder already owns the order (or the id
    /// does not exist). This is the core atomicity guarantee of the system.
    async fn try_acquire_lock(&self, id: Uuid, token: &str) -> Result<Option<Order>>;

    /// As `try_acquire_lock`, but the CAS additionally requires
    /// `status == expected_status`.
    async fn acquire_lock(
        &self,
        id: Uuid,
        expected_status: OrderStatus,
        token: &str,
    ) -> Result<Option<Order>>;

    /// Conditional domain write: applies `patch` only while
    /// `lock == expected_lock` (None = only while explicitly unlocked).
    /// The patch may clear the lock in the same atomic write.
    async fn update_with_lock(
        &self,
        id: Uuid,
        expected_lock: Option<&str>,
        patch: OrderPatch,
    ) -> Result<Option<Order>>;

    /// Unconditionally clears the lock. Used by a holder's completion path.
    async fn release_lock(&self, id: Uuid) -> Result<()>;

    /// Bulk conditional claim: locks every currently-unlocked order matching
    /// the ready filter, per-row atomically, and returns how many were
    /// claimed. Two racing sweeps can never both win the same row.
    async fn lock_ready_orders(&self, filter: ReadyFilter, token: &str) -> Result<u64>;

    /// Administrative escape hatch: force-clears every held lock. Recovery
    /// only, never part of the steady-state flow.
    async fn unlock_all(&self) -> Result<u64>;

    // --- administrative ---

    /// Hard delete, outside the lock protocol. Returns false when absent.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// Filter for the periodic ready-scan bulk claim: orders in `status` whose
/// fulfillment is in `fulfillment_status`, scheduled on `selected_date` at
/// or before `max_selected_time`.
#[derive(Debug, Clone, Copy)]
pub struct ReadyFilter {
    pub status: OrderStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub selected_date: NaiveDate,
    pub max_selected_time: NaiveTime,
}

// ============================================================================
// Patch
// ============================================================================

/// Partial update applied under lock. `None` fields are left untouched;
/// `clear_lock` releases the lock in the same conditional write, which is
/// how transitions finalize without a second round trip.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub fulfillment: Option<Fulfillment>,
    pub cart: Option<Vec<CartLine>>,
    pub discounts: Option<Vec<Discount>>,
    pub payments: Option<Vec<Payment>>,
    pub refunds: Option<Vec<Refund>>,
    pub taxes: Option<Vec<TaxLine>>,
    pub tip_cents: Option<Option<i64>>,
    pub metadata: Option<HashMap<String, String>>,
    pub clear_lock: bool,
}

impl OrderPatch {
    /// Shared by every adapter so the observable merge semantics are
    /// identical regardless of backend. Does NOT decide whether the write
    /// happens - that is the adapter's conditional write.
    pub fn apply(&self, order: &mut Order, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(fulfillment) = &self.fulfillment {
            order.fulfillment = fulfillment.clone();
        }
        if let Some(cart) = &self.cart {
            order.cart = cart.clone();
        }
        if let Some(discounts) = &self.discounts {
            order.discounts = discounts.clone();
        }
        if let Some(payments) = &self.payments {
            order.payments = payments.clone();
        }
        if let Some(refunds) = &self.refunds {
            order.refunds = refunds.clone();
        }
        if let Some(taxes) = &self.taxes {
            order.taxes = taxes.clone();
        }
        if let Some(tip) = self.tip_cents {
            order.tip_cents = tip;
        }
        if let Some(metadata) = &self.metadata {
            order.metadata = metadata.clone();
        }
        if self.clear_lock {
            order.lock = None;
        }
        order.updated_at = now;
    }
}

// ============================================================================
// Storage mapping helpers (shared by both real adapters)
// ============================================================================

/// Order content persisted as one JSON text column in both backends. The
/// filterable fields (status, lock, fulfillment slot) stay as real columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderContent {
    pub cart: Vec<CartLine>,
    pub discounts: Vec<Discount>,
    pub payments: Vec<Payment>,
    pub refunds: Vec<Refund>,
    pub taxes: Vec<TaxLine>,
    pub tip_cents: Option<i64>,
    pub metadata: HashMap<String, String>,
}

impl OrderContent {
    pub fn of(order: &Order) -> Self {
        Self {
            cart: order.cart.clone(),
            discounts: order.discounts.clone(),
            payments: order.payments.clone(),
            refunds: order.refunds.clone(),
            taxes: order.taxes.clone(),
            tip_cents: order.tip_cents,
            metadata: order.metadata.clone(),
        }
    }
}

/// Flat row shape shared by the Scylla and Postgres adapters.
pub(crate) type OrderRow = (
    Uuid,               // id
    String,             // status
    Option<String>,     // lock_token
    String,             // service_type
    String,             // fulfillment_status
    NaiveDate,          // fulfillment_date
    NaiveTime,          // fulfillment_time
    String,             // fulfillment_details (JSON)
    String,             // content (JSON)
    DateTime<Utc>,      // created_at
    DateTime<Utc>,      // updated_at
);

pub(crate) fn order_from_row(row: OrderRow) -> Result<Order> {
    let (
        id,
        status,
        lock_token,
        service_type,
        fulfillment_status,
        fulfillment_date,
        fulfillment_time,
        details_json,
        content_json,
        created_at,
        updated_at,
    ) = row;

    let status = OrderStatus::parse(&status)
        .ok_or_else(|| anyhow::anyhow!("unknown order status in store: {status}"))?;
    let service_type = crate::domain::order::ServiceType::parse(&service_type)
        .ok_or_else(|| anyhow::anyhow!("unknown service type in store: {service_type}"))?;
    let fulfillment_status = FulfillmentStatus::parse(&fulfillment_status).ok_or_else(|| {
        anyhow::anyhow!("unknown fulfillment status in store: {fulfillment_status}")
    })?;
    let details = serde_json::from_str(&details_json)?;
    let content: OrderContent = serde_json::from_str(&content_json)?;

    Ok(Order {
        id,
        status,
        lock: lock_token,
        fulfillment: Fulfillment {
            service_type,
            status: fulfillment_status,
            selected_date: fulfillment_date,
            selected_time: fulfillment_time,
            details,
        },
        cart: content.cart,
        discounts: content.discounts,
        payments: content.payments,
        refunds: content.refunds,
        taxes: content.taxes,
        tip_cents: content.tip_cents,
        metadata: content.metadata,
        created_at,
        updated_at,
    })
}

// ============================================================================
// Backend factory
// ============================================================================

/// Selects the concrete adapter once, at wiring time. Nothing downstream of
/// this function can tell which backend is active.
pub async fn connect(config: &AppConfig) -> Result<Arc<dyn OrderRepository>> {
    if config.use_relational {
        tracing::info!(url = %config.database_url, "Using relational order store");
        Ok(Arc::new(
            PgOrderRepository::connect(&config.database_url).await?,
        ))
    } else {
        tracing::info!(node = %config.scylla_node, keyspace = %config.scylla_keyspace, "Using document order store");
        Ok(Arc::new(
            ScyllaOrderRepository::connect(&config.scylla_node, &config.scylla_keyspace).await?,
        ))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
