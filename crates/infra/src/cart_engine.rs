//! Cart engine: per-client carts validated against the stock ledger.
//!
//! A client starts anonymous. The first mutating call materializes the
//! anonymous snapshot into a persisted customer and cart; from then on the
//! client token is associated with those ids. Every load of a persisted cart
//! drops lines that no longer fit the current availability and audits the
//! drop.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use stockcart_cart::{
    Cart, CartAuditEntry, CartCommand, CartDetails, CartEvent, CartLine, CartTotals,
    ClientAssociation, ClientIdentity, ClientToken, Materialized,
};
use stockcart_core::{Aggregate, AggregateRoot, CartId, CustomerId, ExpectedVersion, ProductId};

use crate::context::EngineContext;
use crate::error::{EngineError, StoreError};
use crate::identity::IdentityEnricher;
use crate::ledger::{available_in, require_product};
use crate::store::StoreTx;

/// Materialization retries when another request for the same token wins the
/// association race.
const MAX_MATERIALIZE_ATTEMPTS: usize = 3;

/// Read view of a client's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    /// `None` while the client is anonymous.
    pub cart_id: Option<CartId>,
    pub customer_id: Option<CustomerId>,
    pub lines: Vec<CartLine>,
    pub details: CartDetails,
    pub totals: CartTotals,
}

#[derive(Debug, Clone)]
enum Mutation {
    Add { product_id: ProductId, amount: Decimal },
    Set { product_id: ProductId, amount: Decimal },
    Remove { product_id: ProductId },
    Details(CartDetails),
    /// Materialize without changing anything.
    Touch,
}

/// Drop lines of `cart` that exceed current availability.
pub(crate) async fn reconcile(
    tx: &mut dyn StoreTx,
    cart: &mut Cart,
) -> Result<Vec<CartEvent>, EngineError> {
    let mut availability = Vec::with_capacity(cart.lines().len());
    for line in cart.lines() {
        availability.push((line.product.id, available_in(tx, &line.product).await?));
    }

    let events = cart.execute(&CartCommand::Reconcile {
        availability,
        at: Utc::now(),
    })?;

    for event in &events {
        if let CartEvent::LineAutoDropped {
            product_id,
            amount,
            available,
            ..
        } = event
        {
            info!(
                cart_id = %cart.cart_id(),
                product_id = %product_id,
                %amount,
                %available,
                "stale cart line dropped"
            );
        }
    }
    Ok(events)
}

/// Save `cart` and append one audit entry per audited event.
pub(crate) async fn save_with_audit(
    tx: &mut dyn StoreTx,
    cart: &Cart,
    expected: ExpectedVersion,
    events: &[CartEvent],
) -> Result<(), EngineError> {
    if events.is_empty() {
        return Ok(());
    }
    tx.save_cart(cart, expected).await?;
    let entries: Vec<CartAuditEntry> = events
        .iter()
        .filter_map(|e| e.audit_entry(cart.cart_id()))
        .collect();
    tx.append_cart_audit(&entries).await?;
    Ok(())
}

#[derive(Clone)]
pub struct CartEngine {
    ctx: EngineContext,
}

impl CartEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self), fields(token = %token, product_id = %product_id), err)]
    pub async fn add(
        &self,
        token: &ClientToken,
        product_id: ProductId,
        amount: Decimal,
    ) -> Result<CartView, EngineError> {
        self.mutate(token, Mutation::Add { product_id, amount }).await
    }

    #[instrument(skip(self), fields(token = %token, product_id = %product_id), err)]
    pub async fn set(
        &self,
        token: &ClientToken,
        product_id: ProductId,
        amount: Decimal,
    ) -> Result<CartView, EngineError> {
        self.mutate(token, Mutation::Set { product_id, amount }).await
    }

    /// Removing a product that is not in the cart is a no-op.
    #[instrument(skip(self), fields(token = %token, product_id = %product_id), err)]
    pub async fn remove(
        &self,
        token: &ClientToken,
        product_id: ProductId,
    ) -> Result<CartView, EngineError> {
        self.mutate(token, Mutation::Remove { product_id }).await
    }

    /// Set checkout details. Method keys must exist in the configuration.
    /// Contact fields are also attached to the customer, best-effort.
    #[instrument(skip(self, details), fields(token = %token), err)]
    pub async fn set_details(
        &self,
        token: &ClientToken,
        details: CartDetails,
    ) -> Result<CartView, EngineError> {
        if let Some(key) = details.delivery_method.as_deref() {
            self.ctx.delivery_method(key)?;
        }
        if let Some(key) = details.payment_method.as_deref() {
            self.ctx.payment_method(key)?;
        }

        let contact = details.contact.clone();
        let view = self.mutate(token, Mutation::Details(details)).await?;

        let identity = ClientIdentity::default().with_contact(&contact);
        if !identity.is_empty() {
            self.enrich_identity(token, &identity).await;
        }
        Ok(view)
    }

    /// Persist the client's cart as it is, materializing an anonymous one.
    #[instrument(skip(self), fields(token = %token), err)]
    pub async fn persist(&self, token: &ClientToken) -> Result<CartView, EngineError> {
        self.mutate(token, Mutation::Touch).await
    }

    /// Forget the client's cart. The persisted cart and its audit trail stay;
    /// the next mutation starts a new cart for the same customer.
    #[instrument(skip(self), fields(token = %token), err)]
    pub async fn clear(&self, token: &ClientToken) -> Result<(), EngineError> {
        self.ctx.sessions.remove_snapshot(token);

        for _ in 0..MAX_MATERIALIZE_ATTEMPTS {
            let Some(current) = self.ctx.sessions.association(token) else {
                return Ok(());
            };
            if current.cart_id.is_none() {
                return Ok(());
            }
            let cleared = ClientAssociation {
                cart_id: None,
                ..current
            };
            if self
                .ctx
                .sessions
                .compare_and_set_association(token, Some(current), Some(cleared))
            {
                info!(cart_id = ?current.cart_id, "cart cleared");
                return Ok(());
            }
        }
        Err(StoreError::Conflict(format!("association for {token} keeps changing")).into())
    }

    /// Current cart. Persisted carts are reconciled against availability
    /// first; anonymous carts are resolved against the catalog only.
    #[instrument(skip(self), fields(token = %token), err)]
    pub async fn load(&self, token: &ClientToken) -> Result<CartView, EngineError> {
        let association = self.ctx.sessions.association(token);
        let Some(cart_id) = association.and_then(|a| a.cart_id) else {
            return self
                .anonymous_view(token, association.map(|a| a.customer_id))
                .await;
        };

        let mut tx = self.ctx.store.begin().await?;
        let mut cart = tx
            .lock_cart(cart_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("cart {cart_id}")))?;

        let expected = ExpectedVersion::Exact(cart.version());
        let events = reconcile(&mut *tx, &mut cart).await?;
        if !events.is_empty() {
            save_with_audit(&mut *tx, &cart, expected, &events).await?;
            tx.commit().await?;
        }
        Ok(self.view(&cart, true))
    }

    pub async fn totals(&self, token: &ClientToken) -> Result<CartTotals, EngineError> {
        Ok(self.load(token).await?.totals)
    }

    /// Audit trail of the client's current cart, oldest first.
    #[instrument(skip(self), fields(token = %token), err)]
    pub async fn audit_log(&self, token: &ClientToken) -> Result<Vec<CartAuditEntry>, EngineError> {
        let Some(cart_id) = self
            .ctx
            .sessions
            .association(token)
            .and_then(|a| a.cart_id)
        else {
            return Ok(Vec::new());
        };
        let mut tx = self.ctx.store.begin().await?;
        Ok(tx.cart_audit(cart_id).await?)
    }

    /// Attach tracking identifiers to the client's customer record.
    /// Never fails; problems are logged.
    pub async fn enrich_identity(&self, token: &ClientToken, identity: &ClientIdentity) {
        IdentityEnricher::new(self.ctx.clone())
            .enrich(token, identity)
            .await;
    }

    async fn mutate(
        &self,
        token: &ClientToken,
        mutation: Mutation,
    ) -> Result<CartView, EngineError> {
        for attempt in 1..=MAX_MATERIALIZE_ATTEMPTS {
            let observed = self.ctx.sessions.association(token);
            let mut tx = self.ctx.store.begin().await?;

            let (mut cart, installed) = match observed.and_then(|a| a.cart_id) {
                Some(cart_id) => {
                    let cart = tx
                        .lock_cart(cart_id)
                        .await?
                        .ok_or_else(|| EngineError::not_found(format!("cart {cart_id}")))?;
                    (cart, None)
                }
                None => {
                    let m = self.materialize(&mut *tx, token, observed).await?;
                    (m.cart, Some(m.association))
                }
            };

            let expected = ExpectedVersion::Exact(cart.version());
            let mut events = reconcile(&mut *tx, &mut cart).await?;
            events.extend(self.apply(&mut *tx, &mut cart, &mutation).await?);
            save_with_audit(&mut *tx, &cart, expected, &events).await?;

            let Some(installed) = installed else {
                tx.commit().await?;
                return Ok(self.view(&cart, true));
            };

            // Only one request per token gets to install the association.
            if !self
                .ctx
                .sessions
                .compare_and_set_association(token, observed, Some(installed))
            {
                debug!(attempt, "lost materialization race; retrying");
                drop(tx);
                continue;
            }
            if let Err(err) = tx.commit().await {
                self.ctx
                    .sessions
                    .compare_and_set_association(token, Some(installed), observed);
                return Err(err.into());
            }
            self.ctx.sessions.remove_snapshot(token);

            info!(
                cart_id = %cart.cart_id(),
                customer_id = %cart.customer_id(),
                lines = cart.lines().len(),
                "cart materialized"
            );
            return Ok(self.view(&cart, true));
        }

        Err(StoreError::Conflict(format!("association for {token} keeps changing")).into())
    }

    async fn materialize(
        &self,
        tx: &mut dyn StoreTx,
        token: &ClientToken,
        observed: Option<ClientAssociation>,
    ) -> Result<Materialized, EngineError> {
        let snapshot = self.ctx.sessions.snapshot(token).unwrap_or_default();

        let mut products = HashMap::new();
        for line in &snapshot.lines {
            if let Some(product) = tx.load_product(line.product_id).await? {
                products.insert(product.id, product);
            }
        }

        let customer_id = observed.map(|a| a.customer_id).unwrap_or_default();
        let m = snapshot.upgrade(customer_id, CartId::new(), Utc::now(), |id| {
            products.get(&id).cloned()
        });

        if observed.is_none() {
            tx.insert_customer(&m.customer).await?;
        }
        tx.insert_cart(&m.cart).await?;

        if !m.skipped.is_empty() {
            warn!(
                cart_id = %m.cart.cart_id(),
                skipped = ?m.skipped,
                "anonymous lines reference unknown products"
            );
        }
        Ok(m)
    }

    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        cart: &mut Cart,
        mutation: &Mutation,
    ) -> Result<Vec<CartEvent>, EngineError> {
        let at = Utc::now();
        let command = match mutation {
            Mutation::Add { product_id, amount } => {
                let product = require_product(tx, *product_id).await?;
                let availability = available_in(tx, &product).await?;
                CartCommand::Add {
                    product,
                    amount: *amount,
                    availability,
                    at,
                }
            }
            Mutation::Set { product_id, amount } => {
                let product = require_product(tx, *product_id).await?;
                let availability = available_in(tx, &product).await?;
                CartCommand::Set {
                    product,
                    amount: *amount,
                    availability,
                    at,
                }
            }
            Mutation::Remove { product_id } => CartCommand::Remove {
                product_id: *product_id,
                at,
            },
            Mutation::Details(details) => CartCommand::UpdateDetails {
                details: details.clone(),
                at,
            },
            Mutation::Touch => return Ok(Vec::new()),
        };
        Ok(cart.execute(&command)?)
    }

    async fn anonymous_view(
        &self,
        token: &ClientToken,
        customer_id: Option<CustomerId>,
    ) -> Result<CartView, EngineError> {
        let snapshot = self.ctx.sessions.snapshot(token).unwrap_or_default();

        let mut lines = Vec::with_capacity(snapshot.lines.len());
        if !snapshot.is_empty() {
            let mut tx = self.ctx.store.begin().await?;
            for line in &snapshot.lines {
                if let Some(product) = tx.load_product(line.product_id).await? {
                    lines.push(CartLine {
                        product,
                        amount: line.amount,
                    });
                }
            }
        }

        let now = Utc::now();
        let cart = Cart::restore(
            CartId::new(),
            customer_id.unwrap_or_default(),
            lines,
            snapshot.details,
            None,
            now,
            now,
            0,
        );
        Ok(CartView {
            customer_id,
            ..self.view(&cart, false)
        })
    }

    fn view(&self, cart: &Cart, persisted: bool) -> CartView {
        CartView {
            cart_id: persisted.then(|| cart.cart_id()),
            customer_id: persisted.then(|| cart.customer_id()),
            lines: cart.lines().to_vec(),
            details: cart.details().clone(),
            totals: cart.totals(self.ctx.sizer.as_ref()),
        }
    }
}
