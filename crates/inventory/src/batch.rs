use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcart_core::{ProductId, StockBatchId};

use crate::error::InventoryError;

/// Stock batches carry at most two decimal places.
pub const BATCH_DECIMAL_PLACES: u32 = 2;

/// A delivered lot of one product with its own quantity and unit cost.
///
/// Batches are consumed oldest-first. A batch that reaches zero is exhausted,
/// never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBatch {
    pub id: StockBatchId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

impl StockBatch {
    /// Receive a new batch.
    pub fn receive(
        product_id: ProductId,
        quantity: Decimal,
        unit_cost: Decimal,
        created_at: DateTime<Utc>,
    ) -> Result<Self, InventoryError> {
        if quantity <= Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(format!(
                "received quantity must be positive, got {quantity}"
            )));
        }
        if stockcart_core::quantity::significant_places(quantity) > BATCH_DECIMAL_PLACES {
            return Err(InventoryError::InvalidQuantity(format!(
                "batch quantity {quantity} has more than {BATCH_DECIMAL_PLACES} decimal places"
            )));
        }
        if unit_cost.is_sign_negative() {
            return Err(InventoryError::InvalidQuantity(format!(
                "unit cost cannot be negative, got {unit_cost}"
            )));
        }
        Ok(Self {
            id: StockBatchId::new(),
            product_id,
            quantity,
            unit_cost,
            created_at,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.quantity <= Decimal::ZERO
    }
}
