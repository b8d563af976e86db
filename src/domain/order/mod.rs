// ============================================================================
// Order Domain - the aggregate root of the ordering core
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Model (Order, Fulfillment, cart/payment records, NewOrder input)
// - State machine (OrderStatus transition table)
// - Errors (OrderError enum)
//
// Locking and persistence are deliberately NOT here: the lock field is a
// plain `Option<String>` on the aggregate, and only the repository layer's
// conditional writes are allowed to flip it.
//
// ============================================================================

pub mod errors;
pub mod model;
pub mod state;

// Re-export for convenience
pub use errors::*;
pub use model::*;
pub use state::*;
