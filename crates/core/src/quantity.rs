//! Fixed-point helpers for quantities and money.
//!
//! Quantities and prices are `rust_decimal::Decimal` throughout; floats never
//! enter the engine.

use rust_decimal::{Decimal, RoundingStrategy};

/// Monetary values are kept to two decimal places.
pub const MONEY_DECIMAL_PLACES: u32 = 2;

/// Weight-capable products accept quantities with at most this many places.
pub const WEIGHT_DECIMAL_PLACES: u32 = 1;

/// True when `value` has no fractional part (`3`, `3.0`, `3.00`).
pub fn is_integral(value: Decimal) -> bool {
    value.fract().is_zero()
}

/// Number of significant decimal places (`1.50` has one).
pub fn significant_places(value: Decimal) -> u32 {
    value.normalize().scale()
}

/// Round a monetary amount half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}
