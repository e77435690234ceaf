//! Transactional persistence boundary.
//!
//! Every engine operation runs in one [`StoreTx`]. Dropping a transaction
//! without calling [`StoreTx::commit`] rolls it back, so an early `?` return
//! leaves all state untouched.
//!
//! Locking contract:
//! - reads named `load_*`/`stock_batches` are plain reads;
//! - `lock_*` reads take an exclusive row lock held until the transaction
//!   ends. Two transactions locking the same rows are serialized.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use stockcart_cart::{Cart, CartAuditEntry, Customer};
use stockcart_catalog::Product;
use stockcart_core::{CartId, CustomerId, ExpectedVersion, OrderId, ProductId};
use stockcart_inventory::StockBatch;
use stockcart_orders::Order;

use crate::error::StoreError;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        (**self).begin().await
    }
}

/// One open transaction.
#[async_trait]
pub trait StoreTx: Send {
    // catalog
    async fn load_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;
    async fn upsert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    // stock
    /// All batches of a product, unlocked.
    async fn stock_batches(&mut self, product_id: ProductId) -> Result<Vec<StockBatch>, StoreError>;
    /// Batches with positive quantity, oldest first, exclusively locked.
    async fn lock_stock_batches(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<StockBatch>, StoreError>;
    async fn insert_stock_batch(&mut self, batch: &StockBatch) -> Result<(), StoreError>;
    async fn update_stock_batch(&mut self, batch: &StockBatch) -> Result<(), StoreError>;
    /// Σ quantity of unreduced order lines for `product_id` whose order is in
    /// a reserving state.
    async fn reserved_quantity(&mut self, product_id: ProductId) -> Result<Decimal, StoreError>;

    // customers
    async fn insert_customer(&mut self, customer: &Customer) -> Result<(), StoreError>;
    async fn load_customer(&mut self, id: CustomerId) -> Result<Option<Customer>, StoreError>;
    async fn update_customer(&mut self, customer: &Customer) -> Result<(), StoreError>;

    // carts
    async fn insert_cart(&mut self, cart: &Cart) -> Result<(), StoreError>;
    /// Lines come back with current product data; lines whose product is gone
    /// are omitted.
    async fn load_cart(&mut self, id: CartId) -> Result<Option<Cart>, StoreError>;
    async fn lock_cart(&mut self, id: CartId) -> Result<Option<Cart>, StoreError>;
    /// Replace the stored cart. `expected` is checked against the stored
    /// version before writing.
    async fn save_cart(&mut self, cart: &Cart, expected: ExpectedVersion) -> Result<(), StoreError>;
    async fn append_cart_audit(&mut self, entries: &[CartAuditEntry]) -> Result<(), StoreError>;
    async fn cart_audit(&mut self, cart_id: CartId) -> Result<Vec<CartAuditEntry>, StoreError>;

    // orders
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;
    async fn load_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;
    /// Persist state, timestamps and per-line reduction results.
    async fn save_order(&mut self, order: &Order, expected: ExpectedVersion)
    -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
