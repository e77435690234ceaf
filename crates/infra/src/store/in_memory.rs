use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockcart_cart::{Cart, CartAuditEntry, CartLine, Customer};
use stockcart_catalog::Product;
use stockcart_core::{
    AggregateRoot, CartId, CustomerId, ExpectedVersion, OrderId, ProductId, StockBatchId,
};
use stockcart_inventory::StockBatch;
use stockcart_orders::Order;

use super::{Store, StoreTx};
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    batches: HashMap<StockBatchId, StockBatch>,
    customers: HashMap<CustomerId, Customer>,
    carts: HashMap<CartId, Cart>,
    audit: Vec<CartAuditEntry>,
    orders: HashMap<OrderId, Order>,
}

impl State {
    fn cart_with_current_products(&self, cart: &Cart) -> Cart {
        let lines = cart
            .lines()
            .iter()
            .filter_map(|line| {
                self.products.get(&line.product.id).map(|p| CartLine {
                    product: p.clone(),
                    amount: line.amount,
                })
            })
            .collect();
        Cart::restore(
            cart.cart_id(),
            cart.customer_id(),
            lines,
            cart.details().clone(),
            cart.order_id(),
            cart.created_at(),
            cart.updated_at(),
            cart.version(),
        )
    }
}

/// In-memory store with the same transactional semantics as the Postgres
/// store.
///
/// A transaction holds the store-wide mutex from `begin` until commit or
/// drop and works on a private copy, so transactions are fully serialized
/// and a dropped transaction leaves no trace. Intended for tests/dev.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
}

fn check_version(what: &str, expected: ExpectedVersion, actual: u64) -> Result<(), StoreError> {
    if expected.matches(actual) {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{what}: expected {expected:?}, found version {actual}"
        )))
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn load_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn upsert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        self.working.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn stock_batches(&mut self, product_id: ProductId) -> Result<Vec<StockBatch>, StoreError> {
        let mut batches: Vec<StockBatch> = self
            .working
            .batches
            .values()
            .filter(|b| b.product_id == product_id)
            .cloned()
            .collect();
        batches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(batches)
    }

    async fn lock_stock_batches(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<StockBatch>, StoreError> {
        let batches = self.stock_batches(product_id).await?;
        Ok(batches
            .into_iter()
            .filter(|b| b.quantity > Decimal::ZERO)
            .collect())
    }

    async fn insert_stock_batch(&mut self, batch: &StockBatch) -> Result<(), StoreError> {
        if !self.working.products.contains_key(&batch.product_id) {
            return Err(StoreError::NotFound(format!("product {}", batch.product_id)));
        }
        if self.working.batches.contains_key(&batch.id) {
            return Err(StoreError::Conflict(format!("stock batch {} exists", batch.id)));
        }
        self.working.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn update_stock_batch(&mut self, batch: &StockBatch) -> Result<(), StoreError> {
        if batch.quantity.is_sign_negative() {
            return Err(StoreError::Conflict(format!(
                "stock batch {} would go negative",
                batch.id
            )));
        }
        match self.working.batches.get_mut(&batch.id) {
            Some(stored) => {
                stored.quantity = batch.quantity;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("stock batch {}", batch.id))),
        }
    }

    async fn reserved_quantity(&mut self, product_id: ProductId) -> Result<Decimal, StoreError> {
        Ok(self
            .working
            .orders
            .values()
            .filter(|o| o.state().holds_reservation())
            .flat_map(|o| o.lines())
            .filter(|l| l.product_id == product_id && !l.stock_reduced)
            .map(|l| l.quantity)
            .sum())
    }

    async fn insert_customer(&mut self, customer: &Customer) -> Result<(), StoreError> {
        if self.working.customers.contains_key(&customer.id) {
            return Err(StoreError::Conflict(format!("customer {} exists", customer.id)));
        }
        self.working.customers.insert(customer.id, customer.clone());
        Ok(())
    }

    async fn load_customer(&mut self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        Ok(self.working.customers.get(&id).cloned())
    }

    async fn update_customer(&mut self, customer: &Customer) -> Result<(), StoreError> {
        match self.working.customers.get_mut(&customer.id) {
            Some(stored) => {
                *stored = customer.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("customer {}", customer.id))),
        }
    }

    async fn insert_cart(&mut self, cart: &Cart) -> Result<(), StoreError> {
        if !self.working.customers.contains_key(&cart.customer_id()) {
            return Err(StoreError::NotFound(format!("customer {}", cart.customer_id())));
        }
        if self.working.carts.contains_key(&cart.cart_id()) {
            return Err(StoreError::Conflict(format!("cart {} exists", cart.cart_id())));
        }
        self.working.carts.insert(cart.cart_id(), cart.clone());
        Ok(())
    }

    async fn load_cart(&mut self, id: CartId) -> Result<Option<Cart>, StoreError> {
        Ok(self
            .working
            .carts
            .get(&id)
            .map(|c| self.working.cart_with_current_products(c)))
    }

    async fn lock_cart(&mut self, id: CartId) -> Result<Option<Cart>, StoreError> {
        self.load_cart(id).await
    }

    async fn save_cart(&mut self, cart: &Cart, expected: ExpectedVersion) -> Result<(), StoreError> {
        let stored = self
            .working
            .carts
            .get_mut(&cart.cart_id())
            .ok_or_else(|| StoreError::NotFound(format!("cart {}", cart.cart_id())))?;
        check_version("cart", expected, stored.version())?;
        *stored = cart.clone();
        Ok(())
    }

    async fn append_cart_audit(&mut self, entries: &[CartAuditEntry]) -> Result<(), StoreError> {
        self.working.audit.extend_from_slice(entries);
        Ok(())
    }

    async fn cart_audit(&mut self, cart_id: CartId) -> Result<Vec<CartAuditEntry>, StoreError> {
        Ok(self
            .working
            .audit
            .iter()
            .filter(|e| e.cart_id == cart_id)
            .cloned()
            .collect())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        if self.working.orders.contains_key(&order.order_id()) {
            return Err(StoreError::Conflict(format!("order {} exists", order.order_id())));
        }
        self.working.orders.insert(order.order_id(), order.clone());
        Ok(())
    }

    async fn load_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.load_order(id).await
    }

    async fn save_order(
        &mut self,
        order: &Order,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let stored = self
            .working
            .orders
            .get_mut(&order.order_id())
            .ok_or_else(|| StoreError::NotFound(format!("order {}", order.order_id())))?;
        check_version("order", expected, stored.version())?;
        *stored = order.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
