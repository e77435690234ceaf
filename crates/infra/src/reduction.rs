//! Stock reduction: consume batches for every line of an order.
//!
//! Runs inside the caller's transaction. Batches are locked before
//! sufficiency is computed, so two transactions reducing the same product are
//! serialized and the second one sees the first one's decrements. Products are
//! locked in ascending id order whatever the line order, so two orders sharing
//! products always take their locks in the same sequence.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use stockcart_core::{Aggregate, OrderLineId, ProductId, StockBatchId};
use stockcart_inventory::consume_oldest_first;
use stockcart_orders::{Order, OrderCommand, OrderError, OrderLine};

use crate::error::EngineError;
use crate::ledger::require_product;
use crate::store::StoreTx;

/// Distinct products of `lines` in the order their batches are locked.
pub(crate) fn lock_sequence(lines: &[OrderLine]) -> Vec<ProductId> {
    lines
        .iter()
        .map(|l| l.product_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Consume stock for every line of `order` and record the realized cost on
/// each line.
///
/// Fails without side effects (once the transaction is dropped) if any line
/// was already reduced or any product is short. Nothing is written until every
/// line has been covered. Returns the order's total realized cost. The caller
/// persists `order`.
#[instrument(skip(tx, order), fields(order_id = %order.order_id()), err)]
pub async fn reduce_order_stock(
    tx: &mut dyn StoreTx,
    order: &mut Order,
    at: DateTime<Utc>,
) -> Result<Decimal, EngineError> {
    if let Some(line) = order.lines().iter().find(|l| l.stock_reduced) {
        return Err(OrderError::StockAlreadyReduced { line_id: line.id }.into());
    }

    let lines = order.lines().to_vec();
    let mut costs: HashMap<OrderLineId, Decimal> = HashMap::with_capacity(lines.len());
    let mut dirty = Vec::new();

    for product_id in lock_sequence(&lines) {
        let product = require_product(tx, product_id).await?;
        let product_lines = lines.iter().filter(|l| l.product_id == product_id);

        if product.is_unlimited {
            costs.extend(product_lines.map(|l| (l.id, Decimal::ZERO)));
            continue;
        }

        let mut batches = tx.lock_stock_batches(product_id).await?;
        let mut touched: BTreeSet<StockBatchId> = BTreeSet::new();
        for line in product_lines {
            let outcome = consume_oldest_first(product_id, &mut batches, line.quantity)?;
            touched.extend(outcome.touched_batches());
            debug!(
                line_id = %line.id,
                product_id = %product_id,
                batches = outcome.consumed.len(),
                realized_cost = %outcome.realized_cost,
                "line stock consumed"
            );
            costs.insert(line.id, outcome.realized_cost);
        }
        dirty.extend(batches.into_iter().filter(|b| touched.contains(&b.id)));
    }

    for batch in &dirty {
        tx.update_stock_batch(batch).await?;
    }
    for line in &lines {
        let realized_cost = costs.get(&line.id).copied().unwrap_or(Decimal::ZERO);
        order.execute(&OrderCommand::RecordStockReduction {
            line_id: line.id,
            realized_cost,
            at,
        })?;
    }

    Ok(order.realized_cost())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use stockcart_catalog::Product;
    use stockcart_core::{AggregateRoot, CustomerId, ExpectedVersion, OrderId, ProductId};
    use stockcart_inventory::StockBatch;
    use stockcart_orders::{
        Address, DeliveryAddress, OrderHeader, OrderLine, PaymentKind, Receiver,
    };

    use crate::error::ErrorKind;
    use crate::store::{InMemoryStore, Store};

    fn order_for(lines: &[(&Product, Decimal)]) -> Order {
        let id = OrderId::new();
        let header = OrderHeader {
            id,
            customer_id: CustomerId::new(),
            cart_id: None,
            payment_method: "cash".into(),
            payment_kind: PaymentKind::OnDelivery,
            delivery_method: "pickup".into(),
            delivery_price: Decimal::ZERO,
            delivery_address: DeliveryAddress::snapshot(Address::default(), None, Utc::now()),
            receiver: Receiver {
                name: "Ann".into(),
                phone: "555-0101".into(),
                email: None,
            },
            created_at: Utc::now(),
        };
        let mut order = Order::empty(id);
        order
            .execute(&OrderCommand::Place {
                header,
                lines: lines
                    .iter()
                    .map(|(p, q)| OrderLine::from_product(id, p, *q))
                    .collect(),
            })
            .unwrap();
        order
    }

    async fn seed(store: &InMemoryStore, product: &Product, batches: &[StockBatch], order: &Order) {
        let mut tx = store.begin().await.unwrap();
        tx.upsert_product(product).await.unwrap();
        for b in batches {
            tx.insert_stock_batch(b).await.unwrap();
        }
        tx.insert_order(order).await.unwrap();
        tx.commit().await.unwrap();
    }

    fn two_batches(p: &Product) -> Vec<StockBatch> {
        let t0 = Utc::now();
        vec![
            StockBatch::receive(p.id, dec!(1.5), dec!(10), t0).unwrap(),
            StockBatch::receive(p.id, dec!(2.5), dec!(10), t0 + chrono::Duration::seconds(1))
                .unwrap(),
        ]
    }

    async fn quantities(store: &InMemoryStore, p: &Product) -> Vec<Decimal> {
        let mut tx = store.begin().await.unwrap();
        tx.stock_batches(p.id)
            .await
            .unwrap()
            .iter()
            .map(|b| b.quantity)
            .collect()
    }

    #[tokio::test]
    async fn consumes_oldest_first_and_records_cost() {
        let store = InMemoryStore::new();
        let p = Product::new(ProductId::new(), "Cheese", dec!(15)).sold_by_weight();
        let order = order_for(&[(&p, dec!(3))]);
        seed(&store, &p, &two_batches(&p), &order).await;

        let mut tx = store.begin().await.unwrap();
        let mut loaded = tx.lock_order(order.order_id()).await.unwrap().unwrap();
        let version = loaded.version();
        let cost = reduce_order_stock(&mut *tx, &mut loaded, Utc::now())
            .await
            .unwrap();
        tx.save_order(&loaded, ExpectedVersion::Exact(version))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(cost, dec!(30));
        assert_eq!(quantities(&store, &p).await, vec![dec!(0), dec!(1.0)]);
        assert!(loaded.is_fully_reduced());
    }

    #[tokio::test]
    async fn second_reduction_fails_and_changes_nothing() {
        let store = InMemoryStore::new();
        let p = Product::new(ProductId::new(), "Cheese", dec!(15)).sold_by_weight();
        let order = order_for(&[(&p, dec!(1))]);
        seed(&store, &p, &two_batches(&p), &order).await;

        for _ in 0..2 {
            let mut tx = store.begin().await.unwrap();
            let mut loaded = tx.lock_order(order.order_id()).await.unwrap().unwrap();
            let version = loaded.version();
            match reduce_order_stock(&mut *tx, &mut loaded, Utc::now()).await {
                Ok(_) => {
                    tx.save_order(&loaded, ExpectedVersion::Exact(version))
                        .await
                        .unwrap();
                    tx.commit().await.unwrap();
                }
                Err(err) => assert_eq!(err.kind(), ErrorKind::IdempotencyViolation),
            }
        }

        assert_eq!(quantities(&store, &p).await, vec![dec!(0.5), dec!(2.5)]);
        let mut tx = store.begin().await.unwrap();
        let stored = tx.load_order(order.order_id()).await.unwrap().unwrap();
        assert_eq!(stored.version(), 2);
        assert_eq!(stored.realized_cost(), dec!(10));
    }

    #[tokio::test]
    async fn shortage_leaves_batches_untouched() {
        let store = InMemoryStore::new();
        let p = Product::new(ProductId::new(), "Cheese", dec!(15)).sold_by_weight();
        let order = order_for(&[(&p, dec!(3))]);
        let single = vec![StockBatch::receive(p.id, dec!(1.5), dec!(10), Utc::now()).unwrap()];
        seed(&store, &p, &single, &order).await;

        let mut tx = store.begin().await.unwrap();
        let mut loaded = tx.lock_order(order.order_id()).await.unwrap().unwrap();
        let err = reduce_order_stock(&mut *tx, &mut loaded, Utc::now())
            .await
            .unwrap_err();
        drop(tx);

        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(quantities(&store, &p).await, vec![dec!(1.5)]);
    }

    #[test]
    fn locks_follow_product_id_order() {
        let a = Product::new(ProductId::new(), "Apples", dec!(2));
        let b = Product::new(ProductId::new(), "Bread", dec!(3));
        let (low, high) = if a.id < b.id { (&a, &b) } else { (&b, &a) };

        let order = order_for(&[(high, dec!(1)), (low, dec!(1)), (high, dec!(2))]);
        assert_eq!(lock_sequence(order.lines()), vec![low.id, high.id]);
    }

    #[tokio::test]
    async fn lines_in_any_order_reduce_every_product() {
        let store = InMemoryStore::new();
        let a = Product::new(ProductId::new(), "Cheese", dec!(15)).sold_by_weight();
        let b = Product::new(ProductId::new(), "Olives", dec!(4));
        let (low, high) = if a.id < b.id { (&a, &b) } else { (&b, &a) };
        let order = order_for(&[(high, dec!(1)), (low, dec!(2)), (high, dec!(1))]);

        let mut tx = store.begin().await.unwrap();
        for p in [high, low] {
            tx.upsert_product(p).await.unwrap();
            for batch in two_batches(p) {
                tx.insert_stock_batch(&batch).await.unwrap();
            }
        }
        tx.insert_order(&order).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut loaded = tx.lock_order(order.order_id()).await.unwrap().unwrap();
        let version = loaded.version();
        let cost = reduce_order_stock(&mut *tx, &mut loaded, Utc::now())
            .await
            .unwrap();
        tx.save_order(&loaded, ExpectedVersion::Exact(version))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(cost, dec!(40));
        assert_eq!(quantities(&store, low).await, vec![dec!(0), dec!(2.0)]);
        assert_eq!(quantities(&store, high).await, vec![dec!(0), dec!(2.0)]);
        let costs: Vec<Decimal> = loaded.lines().iter().map(|l| l.realized_cost).collect();
        assert_eq!(costs, vec![dec!(10), dec!(20), dec!(10)]);
    }

    #[tokio::test]
    async fn shortage_on_a_later_product_writes_nothing() {
        let store = InMemoryStore::new();
        let a = Product::new(ProductId::new(), "Cheese", dec!(15)).sold_by_weight();
        let b = Product::new(ProductId::new(), "Olives", dec!(4));
        let (low, high) = if a.id < b.id { (&a, &b) } else { (&b, &a) };
        let order = order_for(&[(low, dec!(1)), (high, dec!(9))]);

        let mut tx = store.begin().await.unwrap();
        for p in [low, high] {
            tx.upsert_product(p).await.unwrap();
            for batch in two_batches(p) {
                tx.insert_stock_batch(&batch).await.unwrap();
            }
        }
        tx.insert_order(&order).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut loaded = tx.lock_order(order.order_id()).await.unwrap().unwrap();
        let err = reduce_order_stock(&mut *tx, &mut loaded, Utc::now())
            .await
            .unwrap_err();
        tx.commit().await.unwrap();

        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(quantities(&store, low).await, vec![dec!(1.5), dec!(2.5)]);
        assert!(!loaded.lines()[0].stock_reduced);
    }

    #[tokio::test]
    async fn unlimited_lines_cost_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let p = Product::new(ProductId::new(), "E-book", dec!(9)).unlimited();
        let order = order_for(&[(&p, dec!(5))]);
        seed(&store, &p, &[], &order).await;

        let mut tx = store.begin().await.unwrap();
        let mut loaded = tx.lock_order(order.order_id()).await.unwrap().unwrap();
        let cost = reduce_order_stock(&mut *tx, &mut loaded, Utc::now())
            .await
            .unwrap();
        assert_eq!(cost, Decimal::ZERO);
        assert!(loaded.lines()[0].stock_reduced);
    }
}
