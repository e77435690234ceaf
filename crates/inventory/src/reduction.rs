//! Oldest-first stock consumption.
//!
//! The caller must hold exclusive locks on every batch passed in; this module
//! only performs the arithmetic. Sufficiency is checked against the full set
//! before any batch is touched, so a failure leaves the batches unchanged.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcart_core::{ProductId, StockBatchId};

use crate::batch::StockBatch;
use crate::error::InventoryError;

/// Quantity taken from one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumption {
    pub batch_id: StockBatchId,
    pub taken: Decimal,
    pub unit_cost: Decimal,
}

/// Outcome of consuming stock for one order line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReductionOutcome {
    /// Σ unit cost × quantity taken, across batches.
    pub realized_cost: Decimal,
    pub consumed: Vec<Consumption>,
}

impl ReductionOutcome {
    /// Ids of the batches whose quantity changed.
    pub fn touched_batches(&self) -> impl Iterator<Item = StockBatchId> + '_ {
        self.consumed.iter().map(|c| c.batch_id)
    }
}

/// Consume `required` units of `product_id` from `batches`, oldest first.
///
/// Batches are ordered by creation time (ties broken by id) regardless of the
/// order they were passed in. Exhausted batches are skipped.
pub fn consume_oldest_first(
    product_id: ProductId,
    batches: &mut [StockBatch],
    required: Decimal,
) -> Result<ReductionOutcome, InventoryError> {
    if required.is_sign_negative() {
        return Err(InventoryError::InvalidQuantity(format!(
            "required quantity cannot be negative, got {required}"
        )));
    }

    if let Some(foreign) = batches.iter().find(|b| b.product_id != product_id) {
        return Err(InventoryError::ProductMismatch {
            expected: product_id,
            found: foreign.product_id,
        });
    }

    let on_hand: Decimal = batches
        .iter()
        .filter(|b| b.quantity > Decimal::ZERO)
        .map(|b| b.quantity)
        .sum();

    if on_hand < required {
        return Err(InventoryError::InsufficientStock {
            product_id,
            required,
            on_hand,
        });
    }

    batches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut outcome = ReductionOutcome::default();
    let mut remaining = required;

    for batch in batches.iter_mut() {
        if remaining.is_zero() {
            break;
        }
        if batch.is_exhausted() {
            continue;
        }

        let taken = remaining.min(batch.quantity);
        batch.quantity -= taken;
        remaining -= taken;

        outcome.realized_cost += batch.unit_cost * taken;
        outcome.consumed.push(Consumption {
            batch_id: batch.id,
            taken,
            unit_cost: batch.unit_cost,
        });
    }

    Ok(outcome)
}
