//! Order engine: checkout and the order state machine.
//!
//! Every operation is one store transaction. Collaborators (delivery, payment)
//! run inside it, so a collaborator failure leaves nothing behind.
//! Notifications run after commit.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use stockcart_cart::{CartCommand, CartModificationError, ClientAssociation, ClientToken};
use stockcart_core::{Aggregate, AggregateRoot, ExpectedVersion, OrderId};
use stockcart_orders::{
    Address, DeliveryAddress, Order, OrderCommand, OrderError, OrderHeader, OrderLine,
    OrderState, PaymentKind, Receiver,
};

use crate::cart_engine::{CartEngine, reconcile, save_with_audit};
use crate::context::EngineContext;
use crate::error::{EngineError, StoreError};
use crate::providers::{DeliveryRequest, Payment};
use crate::reduction::reduce_order_stock;
use crate::store::StoreTx;

/// Checkout input. Method keys fall back to the ones stored on the cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub delivery_method: Option<String>,
    pub payment_method: Option<String>,
    pub receiver: Receiver,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub payment: Payment,
}

/// State an order moves to when `payment` is reported, if any.
pub fn payment_transition(state: OrderState, payment: &Payment) -> Option<OrderState> {
    if state != OrderState::NcCreated {
        return None;
    }
    if payment.is_paid {
        Some(OrderState::NcPaid)
    } else if payment.is_completed {
        Some(OrderState::NcPayError)
    } else {
        None
    }
}

#[derive(Clone)]
pub struct OrderEngine {
    ctx: EngineContext,
    carts: CartEngine,
}

impl OrderEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            carts: CartEngine::new(ctx.clone()),
            ctx,
        }
    }

    /// Turn the client's cart into an order.
    ///
    /// The cart is reconciled first. If that drops lines, the drops are saved
    /// and checkout fails so the client can review the cart.
    #[instrument(skip(self, checkout), fields(token = %token), err)]
    pub async fn create_from_cart(
        &self,
        token: &ClientToken,
        checkout: Checkout,
    ) -> Result<PlacedOrder, EngineError> {
        checkout.receiver.validate()?;

        let mut association = self.ctx.sessions.association(token);
        if association.and_then(|a| a.cart_id).is_none() {
            let has_lines = self
                .ctx
                .sessions
                .snapshot(token)
                .is_some_and(|s| !s.is_empty());
            if !has_lines {
                return Err(EngineError::validation("cart is empty"));
            }
            self.carts.persist(token).await?;
            association = self.ctx.sessions.association(token);
        }
        let Some((association, cart_id)) = association.and_then(|a| a.cart_id.map(|c| (a, c)))
        else {
            return Err(EngineError::validation("cart is empty"));
        };

        let mut tx = self.ctx.store.begin().await?;
        let mut cart = tx
            .lock_cart(cart_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("cart {cart_id}")))?;
        if let Some(order_id) = cart.order_id() {
            return Err(CartModificationError::AlreadyOrdered { order_id }.into());
        }

        let expected = ExpectedVersion::Exact(cart.version());
        let dropped = reconcile(&mut *tx, &mut cart).await?;
        if !dropped.is_empty() {
            save_with_audit(&mut *tx, &cart, expected, &dropped).await?;
            tx.commit().await?;
            return Err(EngineError::validation(format!(
                "{} cart line(s) are no longer available",
                dropped.len()
            )));
        }
        if cart.is_empty() {
            return Err(EngineError::validation("cart is empty"));
        }

        let payment_key = checkout
            .payment_method
            .or_else(|| cart.details().payment_method.clone())
            .ok_or_else(|| EngineError::validation("payment method is required"))?;
        let delivery_key = checkout
            .delivery_method
            .or_else(|| cart.details().delivery_method.clone())
            .ok_or_else(|| EngineError::validation("delivery method is required"))?;
        let payment_method = self.ctx.payment_method(&payment_key)?;
        let delivery_method = self.ctx.delivery_method(&delivery_key)?;

        let quote = self
            .ctx
            .providers
            .delivery(&delivery_method.provider)?
            .compute_delivery(&DeliveryRequest {
                method: &delivery_method.key,
                options: &delivery_method.options,
                address: &checkout.address,
                order_price: cart.total_price(),
                weight: cart.total_weight(),
                package: cart.packaging(self.ctx.sizer.as_ref()),
            })
            .await?;

        let now = Utc::now();
        let order_id = OrderId::new();
        let header = OrderHeader {
            id: order_id,
            customer_id: cart.customer_id(),
            cart_id: Some(cart_id),
            payment_method: payment_method.key.clone(),
            payment_kind: payment_method.kind,
            delivery_method: delivery_method.key.clone(),
            delivery_price: quote.price,
            delivery_address: DeliveryAddress::snapshot(
                checkout.address,
                quote.normalized_address,
                now,
            ),
            receiver: checkout.receiver,
            created_at: now,
        };
        let lines = cart
            .lines()
            .iter()
            .map(|l| OrderLine::from_product(order_id, &l.product, l.amount))
            .collect();

        let mut order = Order::empty(order_id);
        order.execute(&OrderCommand::Place { header, lines })?;
        tx.insert_order(&order).await?;

        let linked = cart.execute(&CartCommand::LinkOrder { order_id, at: now })?;
        save_with_audit(&mut *tx, &cart, expected, &linked).await?;

        let payment = match payment_method.kind {
            PaymentKind::Online => {
                self.ctx
                    .providers
                    .payment(&payment_method.provider)?
                    .create_payment(&payment_method.key, &order)
                    .await?
            }
            PaymentKind::OnDelivery => Payment::on_delivery(payment_method.provider.clone()),
        };
        if let Some(reference) = payment.reference.as_deref().filter(|r| !r.trim().is_empty()) {
            let version = order.version();
            order.execute(&OrderCommand::AttachPayment {
                reference: reference.to_string(),
                at: Utc::now(),
            })?;
            tx.save_order(&order, ExpectedVersion::Exact(version))
                .await?;
        }
        if let Some(to) = payment_transition(order.state(), &payment) {
            let version = order.version();
            order.execute(&OrderCommand::Transition { to, at: Utc::now() })?;
            tx.save_order(&order, ExpectedVersion::Exact(version))
                .await?;
        }

        tx.commit().await?;

        let superseded = ClientAssociation {
            cart_id: None,
            ..association
        };
        if !self
            .ctx
            .sessions
            .compare_and_set_association(token, Some(association), Some(superseded))
        {
            warn!(cart_id = %cart_id, "client association changed during checkout");
        }

        debug!(cart_id = %cart_id, full_price = %order.full_price(), "cart checked out");
        self.ctx.notify(&order, None).await;

        Ok(PlacedOrder { order, payment })
    }

    /// Move an order to `to`. `CREATED -> CONFIRMED` consumes stock in the
    /// same transaction.
    #[instrument(skip(self), fields(order_id = %order_id, to = %to), err)]
    pub async fn transition(&self, order_id: OrderId, to: OrderState) -> Result<Order, EngineError> {
        let mut tx = self.ctx.store.begin().await?;
        let mut order = lock_order(&mut *tx, order_id).await?;
        let from = order.state();
        let version = order.version();

        if !from.can_transition_to(to) {
            return Err(OrderError::IllegalTransition { from, to }.into());
        }

        let at = Utc::now();
        if OrderState::triggers_stock_reduction(from, to) {
            let cost = reduce_order_stock(&mut *tx, &mut order, at).await?;
            debug!(realized_cost = %cost, "order stock reduced");
        }
        order.execute(&OrderCommand::Transition { to, at })?;
        tx.save_order(&order, ExpectedVersion::Exact(version))
            .await?;
        tx.commit().await?;

        self.ctx.notify(&order, Some(from)).await;
        Ok(order)
    }

    pub async fn confirm(&self, order_id: OrderId) -> Result<Order, EngineError> {
        self.transition(order_id, OrderState::Confirmed).await
    }

    /// Apply a payment result reported by a provider. Payments that do not
    /// move the order leave it unchanged.
    #[instrument(skip(self, payment), fields(order_id = %order_id), err)]
    pub async fn record_payment(
        &self,
        order_id: OrderId,
        payment: &Payment,
    ) -> Result<Order, EngineError> {
        let mut tx = self.ctx.store.begin().await?;
        let mut order = lock_order(&mut *tx, order_id).await?;
        let from = order.state();

        let Some(to) = payment_transition(from, payment) else {
            debug!(state = %from, paid = payment.is_paid, "payment does not change the order");
            return Ok(order);
        };

        let version = order.version();
        order.execute(&OrderCommand::Transition { to, at: Utc::now() })?;
        tx.save_order(&order, ExpectedVersion::Exact(version))
            .await?;
        tx.commit().await?;

        debug!(%from, %to, paid = payment.is_paid, "payment recorded");
        self.ctx.notify(&order, Some(from)).await;
        Ok(order)
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order, EngineError> {
        let mut tx = self.ctx.store.begin().await?;
        tx.load_order(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("order {order_id}")))
    }
}

async fn lock_order(tx: &mut dyn StoreTx, order_id: OrderId) -> Result<Order, EngineError> {
    tx.lock_order(order_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")).into())
}
