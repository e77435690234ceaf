//! Availability arithmetic.
//!
//! `available = Σ positive batch quantities − Σ reserved order quantities`,
//! floored at zero. This is the advisory figure used to reject cart input
//! early; it is a snapshot and can be stale by the time stock is consumed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcart_catalog::Product;

use crate::batch::StockBatch;

/// Quantity of a product available for new reservations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "quantity", rename_all = "snake_case")]
pub enum Availability {
    /// Unlimited products accept any quantity.
    Unbounded,
    Limited(Decimal),
}

impl Availability {
    /// Whether a cart line of `amount` fits into what is available.
    pub fn allows(&self, amount: Decimal) -> bool {
        match self {
            Availability::Unbounded => true,
            Availability::Limited(available) => amount <= *available,
        }
    }

    pub fn limit(&self) -> Option<Decimal> {
        match self {
            Availability::Unbounded => None,
            Availability::Limited(available) => Some(*available),
        }
    }

    pub fn is_sold_out(&self) -> bool {
        matches!(self, Availability::Limited(q) if q.is_zero())
    }
}

impl core::fmt::Display for Availability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Availability::Unbounded => f.write_str("unbounded"),
            Availability::Limited(q) => core::fmt::Display::fmt(q, f),
        }
    }
}

/// Result of one ledger computation, with the inputs kept for diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub on_hand: Decimal,
    pub reserved: Decimal,
    pub available: Availability,
    /// Reservations exceeded stock on hand and the figure was floored at zero.
    pub clamped: bool,
}

/// Compute availability for `product` from its batches and the quantity
/// reserved by orders that have not consumed stock yet.
pub fn availability(product: &Product, batches: &[StockBatch], reserved: Decimal) -> LedgerSnapshot {
    let on_hand: Decimal = batches
        .iter()
        .filter(|b| b.product_id == product.id && b.quantity > Decimal::ZERO)
        .map(|b| b.quantity)
        .sum();

    if product.is_unlimited {
        return LedgerSnapshot {
            on_hand,
            reserved,
            available: Availability::Unbounded,
            clamped: false,
        };
    }

    let raw = on_hand - reserved;
    let clamped = raw < Decimal::ZERO;
    let available = if clamped { Decimal::ZERO } else { raw };

    LedgerSnapshot {
        on_hand,
        reserved,
        available: Availability::Limited(available),
        clamped,
    }
}
