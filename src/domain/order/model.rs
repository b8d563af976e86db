use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::state::{FulfillmentStatus, OrderStatus};

// ============================================================================
// Order Aggregate - Data Model
// ============================================================================
//
// The order is the unit of locking: `lock` is the caller-supplied
// idempotency token of the current exclusive holder, or None when unlocked.
// Only the repository layer's conditional writes may change `lock`; only
// the lifecycle service (while holding the lock) may change `status` or the
// order content.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,

    // Lifecycle
    pub status: OrderStatus,

    /// Exclusive-holder marker. None = unlocked.
    pub lock: Option<String>,

    // Fulfillment slot and channel
    pub fulfillment: Fulfillment,

    // Content, mutated only under lock
    pub cart: Vec<CartLine>,
    pub discounts: Vec<Discount>,
    pub payments: Vec<Payment>,
    pub refunds: Vec<Refund>,
    pub taxes: Vec<TaxLine>,
    pub tip_cents: Option<i64>,
    pub metadata: HashMap<String, String>,

    // Audit trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Sum of cart lines, discounts, taxes and tip, in cents.
    pub fn total_cents(&self) -> i64 {
        let items: i64 = self
            .cart
            .iter()
            .map(|l| l.unit_price_cents * i64::from(l.quantity))
            .sum();
        let discounts: i64 = self.discounts.iter().map(|d| d.amount_cents).sum();
        let taxes: i64 = self.taxes.iter().map(|t| t.amount_cents).sum();
        items - discounts + taxes + self.tip_cents.unwrap_or(0)
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fulfillment {
    pub service_type: ServiceType,
    pub status: FulfillmentStatus,
    pub selected_date: NaiveDate,
    pub selected_time: NaiveTime,
    pub details: FulfillmentDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Pickup,
    Delivery,
    DineIn,
    ThirdParty,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Pickup => "PICKUP",
            ServiceType::Delivery => "DELIVERY",
            ServiceType::DineIn => "DINE_IN",
            ServiceType::ThirdParty => "THIRD_PARTY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PICKUP" => Some(ServiceType::Pickup),
            "DELIVERY" => Some(ServiceType::Delivery),
            "DINE_IN" => Some(ServiceType::DineIn),
            "THIRD_PARTY" => Some(ServiceType::ThirdParty),
            _ => None,
        }
    }
}

/// Service-specific payload: a delivery address for delivery orders, an
/// external reference for third-party marketplace orders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FulfillmentDetails {
    pub delivery_address: Option<String>,
    pub external_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub item_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub code: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub method: String,
    pub amount_cents: i64,
    pub captured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub payment_id: Uuid,
    pub amount_cents: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxLine {
    pub name: String,
    pub amount_cents: i64,
}

// ============================================================================
// Creation input
// ============================================================================

/// An order as submitted by a caller, before identity is assigned. The
/// repository turns this into an `Order` with `status=OPEN` and no lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub fulfillment: Fulfillment,
    pub cart: Vec<CartLine>,
    #[serde(default)]
    pub discounts: Vec<Discount>,
    #[serde(default)]
    pub taxes: Vec<TaxLine>,
    #[serde(default)]
    pub tip_cents: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NewOrder {
    /// Materialize the full aggregate. Called by repository adapters only,
    /// so every backend assigns identity and initial state the same way.
    pub fn into_order(self, id: Uuid, now: DateTime<Utc>) -> Order {
        Order {
            id,
            status: OrderStatus::Open,
            lock: None,
            fulfillment: self.fulfillment,
            cart: self.cart,
            discounts: self.discounts,
            payments: Vec::new(),
            refunds: Vec::new(),
            taxes: self.taxes,
            tip_cents: self.tip_cents,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
