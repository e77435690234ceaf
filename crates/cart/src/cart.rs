use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcart_catalog::{Dimensions, PackagingSizer, Product};
use stockcart_core::quantity::{WEIGHT_DECIMAL_PLACES, is_integral, significant_places};
use stockcart_core::{Aggregate, AggregateRoot, CartId, CustomerId, DomainEvent, OrderId, ProductId};
use stockcart_inventory::Availability;

use crate::audit::{AuditAction, CartAuditEntry};
use crate::error::CartModificationError;

/// The amount-check rule.
///
/// Fails if the product is sold by the piece and `amount` is fractional, if a
/// weight product is given more than one decimal place, or if a stock-tracked
/// product is asked for more than is available.
pub fn check_amount(
    product: &Product,
    amount: Decimal,
    availability: Availability,
) -> Result<(), CartModificationError> {
    if amount <= Decimal::ZERO {
        return Err(CartModificationError::NonPositiveQuantity {
            product_id: product.id,
            amount,
        });
    }

    if product.is_weight {
        if significant_places(amount) > WEIGHT_DECIMAL_PLACES {
            return Err(CartModificationError::TooPrecise {
                product_id: product.id,
                amount,
            });
        }
    } else if !is_integral(amount) {
        return Err(CartModificationError::FractionalQuantity {
            product_id: product.id,
            amount,
        });
    }

    if !product.is_unlimited && !availability.allows(amount) {
        return Err(CartModificationError::ExceedsAvailability {
            product_id: product.id,
            requested: amount,
            available: availability,
        });
    }

    Ok(())
}

/// One (product, quantity) pair in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product: Product,
    pub amount: Decimal,
}

impl CartLine {
    pub fn price(&self) -> Decimal {
        self.product.price_for(self.amount)
    }

    pub fn weight(&self) -> Decimal {
        self.product.weight_for(self.amount)
    }
}

/// Contact fields a client declares during checkout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactDetails {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Checkout choices stored on the cart before an order exists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartDetails {
    pub delivery_method: Option<String>,
    pub payment_method: Option<String>,
    pub contact: ContactDetails,
}

/// Derived read-only figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub price: Decimal,
    pub weight: Decimal,
    pub dimensions: Dimensions,
    /// Number of distinct products.
    pub item_count: usize,
    pub is_empty: bool,
}

/// Aggregate root: Cart.
///
/// Lines keep insertion order; a product appears at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    id: CartId,
    customer_id: CustomerId,
    lines: Vec<CartLine>,
    details: CartDetails,
    order_id: Option<OrderId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Cart {
    /// A fresh, empty cart owned by `customer_id`.
    pub fn new(id: CartId, customer_id: CustomerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_id,
            lines: Vec::new(),
            details: CartDetails::default(),
            order_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Rebuild a cart from stored state. No validation is performed; stale
    /// lines are handled by [`CartCommand::Reconcile`].
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: CartId,
        customer_id: CustomerId,
        lines: Vec<CartLine>,
        details: CartDetails,
        order_id: Option<OrderId>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id,
            customer_id,
            lines,
            details,
            order_id,
            created_at,
            updated_at,
            version,
        }
    }

    pub fn cart_id(&self) -> CartId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product.id == product_id)
    }

    pub fn details(&self) -> &CartDetails {
        &self.details
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.lines.len()
    }

    pub fn total_price(&self) -> Decimal {
        self.lines.iter().map(CartLine::price).sum()
    }

    pub fn total_weight(&self) -> Decimal {
        self.lines.iter().map(CartLine::weight).sum()
    }

    pub fn packaging(&self, sizer: &dyn PackagingSizer) -> Dimensions {
        let items: Vec<(&Product, Decimal)> =
            self.lines.iter().map(|l| (&l.product, l.amount)).collect();
        sizer.package_dimensions(&items)
    }

    pub fn totals(&self, sizer: &dyn PackagingSizer) -> CartTotals {
        CartTotals {
            price: self.total_price(),
            weight: self.total_weight(),
            dimensions: self.packaging(sizer),
            item_count: self.item_count(),
            is_empty: self.is_empty(),
        }
    }

    fn ensure_open(&self) -> Result<(), CartModificationError> {
        match self.order_id {
            Some(order_id) => Err(CartModificationError::AlreadyOrdered { order_id }),
            None => Ok(()),
        }
    }

    fn upsert(&mut self, product: &Product, amount: Decimal) {
        match self.lines.iter_mut().find(|l| l.product.id == product.id) {
            Some(line) => {
                line.product = product.clone();
                line.amount = amount;
            }
            None => self.lines.push(CartLine {
                product: product.clone(),
                amount,
            }),
        }
    }

    fn drop_line(&mut self, product_id: ProductId) {
        self.lines.retain(|l| l.product.id != product_id);
    }
}

impl AggregateRoot for Cart {
    type Id = CartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Commands accepted by a cart.
///
/// Product data and availability are looked up by the caller and carried in
/// the command so the aggregate stays free of IO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartCommand {
    Add {
        product: Product,
        amount: Decimal,
        availability: Availability,
        at: DateTime<Utc>,
    },
    Set {
        product: Product,
        amount: Decimal,
        availability: Availability,
        at: DateTime<Utc>,
    },
    Remove {
        product_id: ProductId,
        at: DateTime<Utc>,
    },
    /// Drop every line that no longer fits its current availability.
    Reconcile {
        availability: Vec<(ProductId, Availability)>,
        at: DateTime<Utc>,
    },
    UpdateDetails {
        details: CartDetails,
        at: DateTime<Utc>,
    },
    LinkOrder {
        order_id: OrderId,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    LineAdded {
        product: Product,
        added: Decimal,
        amount: Decimal,
        at: DateTime<Utc>,
    },
    LineSet {
        product: Product,
        previous: Option<Decimal>,
        amount: Decimal,
        at: DateTime<Utc>,
    },
    LineRemoved {
        product_id: ProductId,
        product_name: String,
        amount: Decimal,
        at: DateTime<Utc>,
    },
    LineAutoDropped {
        product_id: ProductId,
        product_name: String,
        amount: Decimal,
        available: Availability,
        at: DateTime<Utc>,
    },
    DetailsUpdated {
        details: CartDetails,
        at: DateTime<Utc>,
    },
    OrderLinked {
        order_id: OrderId,
        at: DateTime<Utc>,
    },
}

impl DomainEvent for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::LineAdded { .. } => "cart.line.added",
            CartEvent::LineSet { .. } => "cart.line.set",
            CartEvent::LineRemoved { .. } => "cart.line.removed",
            CartEvent::LineAutoDropped { .. } => "cart.line.auto_dropped",
            CartEvent::DetailsUpdated { .. } => "cart.details.updated",
            CartEvent::OrderLinked { .. } => "cart.order.linked",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::LineAdded { at, .. }
            | CartEvent::LineSet { at, .. }
            | CartEvent::LineRemoved { at, .. }
            | CartEvent::LineAutoDropped { at, .. }
            | CartEvent::DetailsUpdated { at, .. }
            | CartEvent::OrderLinked { at, .. } => *at,
        }
    }
}

impl CartEvent {
    /// The product whose line this event changed, if any.
    pub fn product_id(&self) -> Option<ProductId> {
        match self {
            CartEvent::LineAdded { product, .. } | CartEvent::LineSet { product, .. } => {
                Some(product.id)
            }
            CartEvent::LineRemoved { product_id, .. }
            | CartEvent::LineAutoDropped { product_id, .. } => Some(*product_id),
            CartEvent::DetailsUpdated { .. } | CartEvent::OrderLinked { .. } => None,
        }
    }

    /// Line mutations map to exactly one audit entry; detail updates and
    /// order linking are not audited.
    pub fn audit_entry(&self, cart_id: CartId) -> Option<CartAuditEntry> {
        let (action, message) = match self {
            CartEvent::LineAdded {
                product,
                added,
                amount,
                ..
            } => (
                AuditAction::Add,
                format!("added {added} of '{}' ({}), now {amount}", product.name, product.id),
            ),
            CartEvent::LineSet {
                product,
                previous,
                amount,
                ..
            } => (
                AuditAction::Set,
                match previous {
                    Some(prev) => format!(
                        "set '{}' ({}) from {prev} to {amount}",
                        product.name, product.id
                    ),
                    None => format!("set '{}' ({}) to {amount}", product.name, product.id),
                },
            ),
            CartEvent::LineRemoved {
                product_id,
                product_name,
                amount,
                ..
            } => (
                AuditAction::Remove,
                format!("removed '{product_name}' ({product_id}), had {amount}"),
            ),
            CartEvent::LineAutoDropped {
                product_id,
                product_name,
                amount,
                available,
                ..
            } => (
                AuditAction::AutoDrop,
                format!(
                    "dropped '{product_name}' ({product_id}): {amount} in cart, {available} available"
                ),
            ),
            CartEvent::DetailsUpdated { .. } | CartEvent::OrderLinked { .. } => return None,
        };

        Some(CartAuditEntry {
            cart_id,
            action,
            message,
            created_at: self.occurred_at(),
        })
    }
}

impl Aggregate for Cart {
    type Command = CartCommand;
    type Event = CartEvent;
    type Error = CartModificationError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CartEvent::LineAdded { product, amount, .. }
            | CartEvent::LineSet { product, amount, .. } => {
                self.upsert(product, *amount);
            }
            CartEvent::LineRemoved { product_id, .. }
            | CartEvent::LineAutoDropped { product_id, .. } => {
                self.drop_line(*product_id);
            }
            CartEvent::DetailsUpdated { details, .. } => {
                self.details = details.clone();
            }
            CartEvent::OrderLinked { order_id, .. } => {
                self.order_id = Some(*order_id);
            }
        }

        self.updated_at = event.occurred_at();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::Add {
                product,
                amount,
                availability,
                at,
            } => {
                self.ensure_open()?;
                if *amount <= Decimal::ZERO {
                    return Err(CartModificationError::NonPositiveQuantity {
                        product_id: product.id,
                        amount: *amount,
                    });
                }
                let existing = self.line(product.id).map(|l| l.amount);
                let new_amount = existing.unwrap_or(Decimal::ZERO) + *amount;
                check_amount(product, new_amount, *availability)?;
                Ok(vec![CartEvent::LineAdded {
                    product: product.clone(),
                    added: *amount,
                    amount: new_amount,
                    at: *at,
                }])
            }
            CartCommand::Set {
                product,
                amount,
                availability,
                at,
            } => {
                self.ensure_open()?;
                check_amount(product, *amount, *availability)?;
                Ok(vec![CartEvent::LineSet {
                    product: product.clone(),
                    previous: self.line(product.id).map(|l| l.amount),
                    amount: *amount,
                    at: *at,
                }])
            }
            CartCommand::Remove { product_id, at } => {
                self.ensure_open()?;
                Ok(self
                    .line(*product_id)
                    .map(|line| CartEvent::LineRemoved {
                        product_id: *product_id,
                        product_name: line.product.name.clone(),
                        amount: line.amount,
                        at: *at,
                    })
                    .into_iter()
                    .collect())
            }
            CartCommand::Reconcile { availability, at } => Ok(self
                .lines
                .iter()
                .filter_map(|line| {
                    let (_, available) = availability
                        .iter()
                        .find(|(pid, _)| *pid == line.product.id)?;
                    if line.product.is_unlimited || available.allows(line.amount) {
                        return None;
                    }
                    Some(CartEvent::LineAutoDropped {
                        product_id: line.product.id,
                        product_name: line.product.name.clone(),
                        amount: line.amount,
                        available: *available,
                        at: *at,
                    })
                })
                .collect()),
            CartCommand::UpdateDetails { details, at } => {
                self.ensure_open()?;
                Ok(vec![CartEvent::DetailsUpdated {
                    details: details.clone(),
                    at: *at,
                }])
            }
            CartCommand::LinkOrder { order_id, at } => {
                self.ensure_open()?;
                Ok(vec![CartEvent::OrderLinked {
                    order_id: *order_id,
                    at: *at,
                }])
            }
        }
    }
}
