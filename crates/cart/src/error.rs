use rust_decimal::Decimal;
use thiserror::Error;

use stockcart_core::{OrderId, ProductId};
use stockcart_inventory::Availability;

/// A cart mutation was rejected before anything changed.
///
/// All variants are user-correctable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CartModificationError {
    #[error("product {product_id} is sold by the piece; {amount} is not a whole number")]
    FractionalQuantity { product_id: ProductId, amount: Decimal },

    #[error("product {product_id} accepts at most one decimal place; got {amount}")]
    TooPrecise { product_id: ProductId, amount: Decimal },

    #[error("quantity for product {product_id} must be positive; got {amount}")]
    NonPositiveQuantity { product_id: ProductId, amount: Decimal },

    #[error("only {available} of product {product_id} available; requested {requested}")]
    ExceedsAvailability {
        product_id: ProductId,
        requested: Decimal,
        available: Availability,
    },

    #[error("cart already produced order {order_id}")]
    AlreadyOrdered { order_id: OrderId },
}
