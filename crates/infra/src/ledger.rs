//! Stock ledger service: advisory availability reads and stock receiving.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use stockcart_catalog::Product;
use stockcart_core::ProductId;
use stockcart_inventory::{Availability, StockBatch, availability};

use crate::error::EngineError;
use crate::store::{Store, StoreTx};

/// Availability of `product` as seen by `tx`. Unlocked and advisory.
pub(crate) async fn available_in(
    tx: &mut dyn StoreTx,
    product: &Product,
) -> Result<Availability, EngineError> {
    if product.is_unlimited {
        return Ok(Availability::Unbounded);
    }

    let batches = tx.stock_batches(product.id).await?;
    let reserved = tx.reserved_quantity(product.id).await?;
    let snapshot = availability(product, &batches, reserved);

    if snapshot.clamped {
        warn!(
            product_id = %product.id,
            on_hand = %snapshot.on_hand,
            reserved = %snapshot.reserved,
            "reservations exceed stock on hand; availability clamped to zero"
        );
    }

    Ok(snapshot.available)
}

pub(crate) async fn require_product(
    tx: &mut dyn StoreTx,
    product_id: ProductId,
) -> Result<Product, EngineError> {
    tx.load_product(product_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("product {product_id}")))
}

#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn Store>,
}

impl StockLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Quantity of `product_id` available for new reservations.
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn available_quantity(
        &self,
        product_id: ProductId,
    ) -> Result<Availability, EngineError> {
        let mut tx = self.store.begin().await?;
        let product = require_product(&mut *tx, product_id).await?;
        available_in(&mut *tx, &product).await
    }

    /// Add or replace catalog data for a product.
    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    pub async fn register_product(&self, product: &Product) -> Result<(), EngineError> {
        product.validate()?;
        let mut tx = self.store.begin().await?;
        tx.upsert_product(product).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record a delivered batch. Batches are append-only; only the reduction
    /// algorithm changes their quantity afterwards.
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn receive(
        &self,
        product_id: ProductId,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> Result<StockBatch, EngineError> {
        let batch = StockBatch::receive(product_id, quantity, unit_cost, Utc::now())?;

        let mut tx = self.store.begin().await?;
        require_product(&mut *tx, product_id).await?;
        tx.insert_stock_batch(&batch).await?;
        tx.commit().await?;

        info!(batch_id = %batch.id, %quantity, %unit_cost, "stock batch received");
        Ok(batch)
    }
}
