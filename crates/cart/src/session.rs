//! Client session state.
//!
//! An anonymous client carries an [`AnonymousCartSnapshot`] scoped to its
//! opaque token. Once persisted, the token instead maps to a
//! [`ClientAssociation`]. [`AnonymousCartSnapshot::upgrade`] is the single
//! conversion between the two.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcart_catalog::Product;
use stockcart_core::{CartId, CustomerId, DomainError, ProductId};

use crate::cart::{Cart, CartDetails, CartLine};
use crate::customer::Customer;

/// Opaque client token (cookie or session key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientToken(String);

impl ClientToken {
    pub fn new(token: impl Into<String>) -> Result<Self, DomainError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(DomainError::validation("client token cannot be empty"));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ClientToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub product_id: ProductId,
    pub amount: Decimal,
}

/// Lines and checkout details held for a client that has no persisted cart.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnonymousCartSnapshot {
    #[serde(default)]
    pub lines: Vec<SnapshotLine>,
    #[serde(default)]
    pub details: CartDetails,
}

/// Token → persisted ids.
///
/// `cart_id` is dropped when the cart is cleared or turned into an order;
/// the customer stays.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAssociation {
    pub customer_id: CustomerId,
    pub cart_id: Option<CartId>,
}

/// Output of [`AnonymousCartSnapshot::upgrade`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub customer: Customer,
    pub cart: Cart,
    pub association: ClientAssociation,
    /// Snapshot lines whose product no longer exists.
    pub skipped: Vec<ProductId>,
}

impl AnonymousCartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Upsert a line, keeping insertion order.
    pub fn put(&mut self, product_id: ProductId, amount: Decimal) {
        match self.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => line.amount = amount,
            None => self.lines.push(SnapshotLine { product_id, amount }),
        }
    }

    /// Turn the snapshot into a persisted customer and cart.
    ///
    /// Lines are carried over as-is; availability is re-checked when the cart
    /// is next loaded. Lines whose product `lookup` cannot resolve are skipped.
    pub fn upgrade<F>(
        self,
        customer_id: CustomerId,
        cart_id: CartId,
        now: DateTime<Utc>,
        mut lookup: F,
    ) -> Materialized
    where
        F: FnMut(ProductId) -> Option<Product>,
    {
        let mut lines: Vec<CartLine> = Vec::with_capacity(self.lines.len());
        let mut skipped = Vec::new();

        for SnapshotLine { product_id, amount } in self.lines {
            match lookup(product_id) {
                Some(product) => match lines.iter_mut().find(|l| l.product.id == product_id) {
                    Some(existing) => existing.amount = amount,
                    None => lines.push(CartLine { product, amount }),
                },
                None => skipped.push(product_id),
            }
        }

        let cart = Cart::restore(
            cart_id,
            customer_id,
            lines,
            self.details,
            None,
            now,
            now,
            0,
        );

        Materialized {
            customer: Customer::new(customer_id, now),
            cart,
            association: ClientAssociation {
                customer_id,
                cart_id: Some(cart_id),
            },
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_token_rejected() {
        assert!(ClientToken::new("  ").is_err());
        assert_eq!(ClientToken::new("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn upgrade_keeps_order_and_skips_unknown_products() {
        let a = Product::new(ProductId::new(), "A", dec!(1));
        let b = Product::new(ProductId::new(), "B", dec!(2));
        let gone = ProductId::new();

        let mut snapshot = AnonymousCartSnapshot::default();
        snapshot.put(b.id, dec!(2));
        snapshot.put(gone, dec!(1));
        snapshot.put(a.id, dec!(3));
        snapshot.put(b.id, dec!(4));

        let catalog = [a.clone(), b.clone()];
        let customer_id = CustomerId::new();
        let cart_id = CartId::new();
        let m = snapshot.upgrade(customer_id, cart_id, Utc::now(), |id| {
            catalog.iter().find(|p| p.id == id).cloned()
        });

        let amounts: Vec<(ProductId, Decimal)> = m
            .cart
            .lines()
            .iter()
            .map(|l| (l.product.id, l.amount))
            .collect();
        assert_eq!(amounts, vec![(b.id, dec!(4)), (a.id, dec!(3))]);
        assert_eq!(m.skipped, vec![gone]);
        assert_eq!(m.cart.customer_id(), customer_id);
        assert_eq!(m.association.cart_id, Some(cart_id));
        assert_eq!(m.customer.id, customer_id);
    }
}
