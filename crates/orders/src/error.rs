use thiserror::Error;

use stockcart_core::{OrderId, OrderLineId};

use crate::state::OrderState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("illegal order transition {from} -> {to}")]
    IllegalTransition { from: OrderState, to: OrderState },

    /// The idempotency guard tripped: stock for this line is already consumed.
    #[error("stock already reduced for order line {line_id}")]
    StockAlreadyReduced { line_id: OrderLineId },

    #[error("order {order_id} has no line {line_id}")]
    UnknownLine {
        order_id: OrderId,
        line_id: OrderLineId,
    },

    #[error("order {0} already placed")]
    AlreadyPlaced(OrderId),

    #[error("order {0} not placed")]
    NotPlaced(OrderId),

    #[error("invalid order: {0}")]
    Invalid(String),
}
