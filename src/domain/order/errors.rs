use super::state::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Illegal transition {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order is in terminal status {0:?}")]
    Terminal(OrderStatus),

    #[error("Order cart cannot be empty")]
    EmptyCart,

    #[error("Invalid line quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Catalog rejected the order: {0}")]
    CatalogRejected(String),
}

impl OrderError {
    /// Validate cart contents before any catalog round trip.
    pub fn check_cart(cart: &[super::model::CartLine]) -> Result<(), OrderError> {
        if cart.is_empty() {
            return Err(OrderError::EmptyCart);
        }
        for line in cart {
            if line.quantity <= 0 {
                return Err(OrderError::InvalidQuantity(line.quantity));
            }
        }
        Ok(())
    }

    /// Guard a status change against the transition table.
    pub fn check_transition(from: OrderStatus, to: OrderStatus) -> Result<(), OrderError> {
        if from.is_terminal() {
            return Err(OrderError::Terminal(from));
        }
        if !from.can_transition_to(to) {
            return Err(OrderError::InvalidTransition { from, to });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::model::CartLine;
    use uuid::Uuid;

    #[test]
    fn test_empty_cart_rejected() {
        assert!(matches!(
            OrderError::check_cart(&[]),
            Err(OrderError::EmptyCart)
        ));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let cart = vec![CartLine {
            item_id: Uuid::new_v4(),
            name: "Espresso".into(),
            quantity: 0,
            unit_price_cents: 300,
            modifiers: vec![],
        }];
        assert!(matches!(
            OrderError::check_cart(&cart),
            Err(OrderError::InvalidQuantity(0))
        ));
    }

    #[test]
    fn test_terminal_guard_wins_over_transition_guard() {
        let err = OrderError::check_transition(OrderStatus::Completed, OrderStatus::Canceled)
            .unwrap_err();
        assert!(matches!(err, OrderError::Terminal(OrderStatus::Completed)));
    }

    #[test]
    fn test_backward_transition_rejected() {
        let err =
            OrderError::check_transition(OrderStatus::Confirmed, OrderStatus::Open).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
    }
}
