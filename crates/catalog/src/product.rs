use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcart_core::{DomainError, ProductId};

/// Packaging dimensions of a single unit, in centimetres.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub length: Decimal,
    pub width: Decimal,
    pub height: Decimal,
}

impl Dimensions {
    pub fn new(length: Decimal, width: Decimal, height: Decimal) -> Self {
        Self {
            length,
            width,
            height,
        }
    }

    pub fn volume(&self) -> Decimal {
        self.length * self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.length.is_zero() && self.width.is_zero() && self.height.is_zero()
    }
}

/// Product as seen by the cart/order engine.
///
/// Immutable for this subsystem's purposes; stock is tracked separately in
/// stock batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Unit price (two decimal places).
    pub price: Decimal,
    /// Unit weight in kilograms.
    pub weight: Decimal,
    pub dimensions: Dimensions,
    /// Skip stock accounting entirely.
    pub is_unlimited: bool,
    /// Sold by weight: quantities may be fractional to one decimal place.
    pub is_weight: bool,
    pub always_visible: bool,
}

impl Product {
    /// A plain, stock-tracked, piece-counted product.
    pub fn new(id: ProductId, name: impl Into<String>, price: Decimal) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            weight: Decimal::ZERO,
            dimensions: Dimensions::default(),
            is_unlimited: false,
            is_weight: false,
            always_visible: false,
        }
    }

    pub fn with_weight(mut self, weight: Decimal) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn unlimited(mut self) -> Self {
        self.is_unlimited = true;
        self
    }

    pub fn sold_by_weight(mut self) -> Self {
        self.is_weight = true;
        self
    }

    pub fn always_visible(mut self) -> Self {
        self.always_visible = true;
        self
    }

    /// Price of `quantity` units.
    pub fn price_for(&self, quantity: Decimal) -> Decimal {
        self.price * quantity
    }

    /// Weight of `quantity` units.
    pub fn weight_for(&self, quantity: Decimal) -> Decimal {
        self.weight * quantity
    }

    /// Validate catalog data before it is stored.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if self.price.is_sign_negative() {
            return Err(DomainError::validation("product price cannot be negative"));
        }
        if self.weight.is_sign_negative() {
            return Err(DomainError::validation("product weight cannot be negative"));
        }
        let d = &self.dimensions;
        if d.length.is_sign_negative() || d.width.is_sign_negative() || d.height.is_sign_negative()
        {
            return Err(DomainError::validation("product dimensions cannot be negative"));
        }
        Ok(())
    }
}
