use serde::{Deserialize, Serialize};

// ============================================================================
// Order Lifecycle State Machine
// ============================================================================
//
// OPEN -> CONFIRMED -> PROCESSING -> COMPLETED
// CANCELED is reachable from OPEN, CONFIRMED and PROCESSING.
// COMPLETED and CANCELED are terminal.
//
// This table is the single source of truth for legal transitions. Nothing
// outside the lifecycle service may write `status`, and the lifecycle
// service only writes it while holding the order lock.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    Confirmed,
    Processing,
    Completed,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "OPEN",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(OrderStatus::Open),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "PROCESSING" => Some(OrderStatus::Processing),
            "COMPLETED" => Some(OrderStatus::Completed),
            "CANCELED" => Some(OrderStatus::Canceled),
            _ => None,
        }
    }

    /// No further transition is legal out of a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Canceled)
    }

    /// The transition table from the lifecycle design.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Open, Confirmed)
                | (Confirmed, Processing)
                | (Processing, Completed)
                | (Open, Canceled)
                | (Confirmed, Canceled)
                | (Processing, Canceled)
        )
    }
}

/// Fulfillment-side status, independent of the order status. The ready-scan
/// claims orders whose fulfillment is `Confirmed` and due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentStatus {
    Pending,
    Confirmed,
    Sent,
    Fulfilled,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => "PENDING",
            FulfillmentStatus::Confirmed => "CONFIRMED",
            FulfillmentStatus::Sent => "SENT",
            FulfillmentStatus::Fulfilled => "FULFILLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(FulfillmentStatus::Pending),
            "CONFIRMED" => Some(FulfillmentStatus::Confirmed),
            "SENT" => Some(FulfillmentStatus::Sent),
            "FULFILLED" => Some(FulfillmentStatus::Fulfilled),
            _ => None,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
