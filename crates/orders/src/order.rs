use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockcart_catalog::Product;
use stockcart_core::{
    Aggregate, AggregateRoot, CartId, CustomerId, DomainEvent, OrderId, OrderLineId, ProductId,
};

use crate::address::{DeliveryAddress, Receiver};
use crate::error::OrderError;
use crate::state::{OrderState, PaymentKind};

/// Order line: a reserved quantity of one product, priced at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// `unit_price × quantity`, captured when the order was created.
    pub sale_price: Decimal,
    /// Σ unit cost × consumed quantity over the batches that fed this line.
    pub realized_cost: Decimal,
    /// Idempotency guard for stock reduction.
    pub stock_reduced: bool,
}

impl OrderLine {
    pub fn from_product(order_id: OrderId, product: &Product, quantity: Decimal) -> Self {
        Self {
            id: OrderLineId::new(),
            order_id,
            product_id: product.id,
            product_name: product.name.clone(),
            quantity,
            unit_price: product.price,
            sale_price: product.price_for(quantity),
            realized_cost: Decimal::ZERO,
            stock_reduced: false,
        }
    }
}

/// Order data fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHeader {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub cart_id: Option<CartId>,
    pub payment_method: String,
    pub payment_kind: PaymentKind,
    pub delivery_method: String,
    pub delivery_price: Decimal,
    pub delivery_address: DeliveryAddress,
    pub receiver: Receiver,
    pub created_at: DateTime<Utc>,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    header: Option<OrderHeader>,
    state: OrderState,
    lines: Vec<OrderLine>,
    /// Identifier of the payment intent created for this order, if any.
    payment_reference: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            header: None,
            state: OrderState::Created,
            lines: Vec::new(),
            payment_reference: None,
            updated_at: None,
            version: 0,
        }
    }

    /// Rebuild a placed order from stored state.
    pub fn restore(
        header: OrderHeader,
        state: OrderState,
        lines: Vec<OrderLine>,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id: header.id,
            header: Some(header),
            state,
            lines,
            payment_reference: None,
            updated_at: Some(updated_at),
            version,
        }
    }

    pub fn with_payment_reference(mut self, reference: Option<String>) -> Self {
        self.payment_reference = reference;
        self
    }

    pub fn order_id(&self) -> OrderId {
        self.id
    }

    pub fn is_placed(&self) -> bool {
        self.header.is_some()
    }

    pub fn header(&self) -> Option<&OrderHeader> {
        self.header.as_ref()
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn line(&self, line_id: OrderLineId) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_reference.as_deref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn delivery_price(&self) -> Decimal {
        self.header
            .as_ref()
            .map(|h| h.delivery_price)
            .unwrap_or(Decimal::ZERO)
    }

    /// Goods total.
    pub fn price(&self) -> Decimal {
        self.lines.iter().map(|l| l.sale_price).sum()
    }

    /// Goods total plus delivery.
    pub fn full_price(&self) -> Decimal {
        self.price() + self.delivery_price()
    }

    pub fn realized_cost(&self) -> Decimal {
        self.lines.iter().map(|l| l.realized_cost).sum()
    }

    pub fn is_fully_reduced(&self) -> bool {
        self.lines.iter().all(|l| l.stock_reduced)
    }

    fn ensure_placed(&self) -> Result<(), OrderError> {
        if self.header.is_none() {
            return Err(OrderError::NotPlaced(self.id));
        }
        Ok(())
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCommand {
    Place {
        header: OrderHeader,
        lines: Vec<OrderLine>,
    },
    Transition {
        to: OrderState,
        at: DateTime<Utc>,
    },
    RecordStockReduction {
        line_id: OrderLineId,
        realized_cost: Decimal,
        at: DateTime<Utc>,
    },
    AttachPayment {
        reference: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed {
        header: OrderHeader,
        state: OrderState,
        lines: Vec<OrderLine>,
    },
    Transitioned {
        from: OrderState,
        to: OrderState,
        at: DateTime<Utc>,
    },
    StockReduced {
        line_id: OrderLineId,
        realized_cost: Decimal,
        at: DateTime<Utc>,
    },
    PaymentAttached {
        reference: String,
        at: DateTime<Utc>,
    },
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed { .. } => "order.placed",
            OrderEvent::Transitioned { .. } => "order.transitioned",
            OrderEvent::StockReduced { .. } => "order.line.stock_reduced",
            OrderEvent::PaymentAttached { .. } => "order.payment.attached",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Placed { header, .. } => header.created_at,
            OrderEvent::Transitioned { at, .. }
            | OrderEvent::StockReduced { at, .. }
            | OrderEvent::PaymentAttached { at, .. } => *at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = OrderError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Placed {
                header,
                state,
                lines,
            } => {
                self.id = header.id;
                self.header = Some(header.clone());
                self.state = *state;
                self.lines = lines.clone();
            }
            OrderEvent::Transitioned { to, .. } => {
                self.state = *to;
            }
            OrderEvent::StockReduced {
                line_id,
                realized_cost,
                ..
            } => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.id == *line_id) {
                    line.realized_cost = *realized_cost;
                    line.stock_reduced = true;
                }
            }
            OrderEvent::PaymentAttached { reference, .. } => {
                self.payment_reference = Some(reference.clone());
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Place { header, lines } => self.handle_place(header, lines),
            OrderCommand::Transition { to, at } => {
                self.ensure_placed()?;
                if !self.state.can_transition_to(*to) {
                    return Err(OrderError::IllegalTransition {
                        from: self.state,
                        to: *to,
                    });
                }
                Ok(vec![OrderEvent::Transitioned {
                    from: self.state,
                    to: *to,
                    at: *at,
                }])
            }
            OrderCommand::RecordStockReduction {
                line_id,
                realized_cost,
                at,
            } => {
                self.ensure_placed()?;
                let line = self.line(*line_id).ok_or(OrderError::UnknownLine {
                    order_id: self.id,
                    line_id: *line_id,
                })?;
                if line.stock_reduced {
                    return Err(OrderError::StockAlreadyReduced { line_id: *line_id });
                }
                if realized_cost.is_sign_negative() {
                    return Err(OrderError::Invalid(format!(
                        "realized cost for line {line_id} cannot be negative"
                    )));
                }
                Ok(vec![OrderEvent::StockReduced {
                    line_id: *line_id,
                    realized_cost: *realized_cost,
                    at: *at,
                }])
            }
            OrderCommand::AttachPayment { reference, at } => {
                self.ensure_placed()?;
                if reference.trim().is_empty() {
                    return Err(OrderError::Invalid("payment reference is empty".into()));
                }
                if self.payment_reference.is_some() {
                    return Err(OrderError::Invalid(format!(
                        "order {} already has a payment",
                        self.id
                    )));
                }
                Ok(vec![OrderEvent::PaymentAttached {
                    reference: reference.clone(),
                    at: *at,
                }])
            }
        }
    }
}

impl Order {
    fn handle_place(
        &self,
        header: &OrderHeader,
        lines: &[OrderLine],
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.header.is_some() {
            return Err(OrderError::AlreadyPlaced(self.id));
        }
        if header.id != self.id {
            return Err(OrderError::Invalid("order_id mismatch".into()));
        }
        if lines.is_empty() {
            return Err(OrderError::Invalid("an order needs at least one line".into()));
        }
        if header.delivery_price.is_sign_negative() {
            return Err(OrderError::Invalid("delivery price cannot be negative".into()));
        }
        header
            .receiver
            .validate()
            .map_err(|e| OrderError::Invalid(e.to_string()))?;

        for line in lines {
            if line.order_id != header.id {
                return Err(OrderError::Invalid(format!(
                    "line {} belongs to order {}",
                    line.id, line.order_id
                )));
            }
            if line.quantity <= Decimal::ZERO {
                return Err(OrderError::Invalid(format!(
                    "line {} has non-positive quantity {}",
                    line.id, line.quantity
                )));
            }
            if line.stock_reduced {
                return Err(OrderError::StockAlreadyReduced { line_id: line.id });
            }
        }

        Ok(vec![OrderEvent::Placed {
            header: header.clone(),
            state: OrderState::initial(header.payment_kind),
            lines: lines.to_vec(),
        }])
    }
}
