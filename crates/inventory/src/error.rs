use rust_decimal::Decimal;
use thiserror::Error;

use stockcart_core::ProductId;

/// Inventory-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// The locked batches cannot cover the requested quantity. Nothing was
    /// consumed.
    #[error("insufficient stock for product {product_id}: required {required}, on hand {on_hand}")]
    InsufficientStock {
        product_id: ProductId,
        required: Decimal,
        on_hand: Decimal,
    },

    #[error("invalid stock quantity: {0}")]
    InvalidQuantity(String),

    /// A batch handed to the walk belongs to another product.
    #[error("batch belongs to product {found}, expected {expected}")]
    ProductMismatch { expected: ProductId, found: ProductId },
}
