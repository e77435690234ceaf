//! End-to-end tests across the engines.
//!
//! Verifies:
//! - Cart -> order -> confirm prices, reserves and consumes stock correctly
//! - Concurrent confirmations never oversell
//! - Anonymous carts survive materialization minus sold-out lines
//! - Collaborator failures leave nothing behind
//! - Online orders hold stock until they fail, and keep their payment reference
//! - On-delivery checkout never contacts the payment provider

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use stockcart_cart::{
        AnonymousCartSnapshot, AuditAction, CartModificationError, ClientToken,
    };
    use stockcart_catalog::Product;
    use stockcart_core::{Aggregate, CustomerId, OrderId, ProductId};
    use stockcart_inventory::Availability;
    use stockcart_orders::{
        Address, DeliveryAddress, Order, OrderCommand, OrderHeader, OrderLine, OrderState,
        PaymentKind, Receiver,
    };

    use crate::cart_engine::CartEngine;
    use crate::config::{CommerceConfig, DeliveryMethodConfig, PaymentMethodConfig};
    use crate::context::EngineContext;
    use crate::error::{CollaboratorError, EngineError, ErrorKind};
    use crate::ledger::StockLedger;
    use crate::order_engine::{Checkout, OrderEngine};
    use crate::providers::{
        DeliveryProvider, DeliveryQuote, DeliveryRequest, Notifier, Payment, PaymentProvider,
        ProviderRegistry,
    };
    use crate::session_store::InMemorySessionStore;
    use crate::store::InMemoryStore;

    fn receiver() -> Receiver {
        Receiver {
            name: "Ann".into(),
            phone: "555-0101".into(),
            email: Some("ann@example.com".into()),
        }
    }

    fn checkout(delivery: &str) -> Checkout {
        Checkout {
            delivery_method: Some(delivery.into()),
            payment_method: Some("cash".into()),
            receiver: receiver(),
            address: Address {
                country: Some("LV".into()),
                city: Some("Riga".into()),
                street: Some("Brivibas 1".into()),
                ..Default::default()
            },
        }
    }

    fn courier_config() -> CommerceConfig {
        let mut config = CommerceConfig::default();
        config.delivery_methods.push(DeliveryMethodConfig {
            key: "courier".into(),
            name: "Courier".into(),
            provider: "constant_price".into(),
            options: serde_json::json!({ "price": "4.90" }),
        });
        config
    }

    fn context(config: CommerceConfig) -> EngineContext {
        EngineContext::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemorySessionStore::new()),
            config,
        )
    }

    async fn register(ctx: &EngineContext, product: Product, batches: &[(Decimal, Decimal)]) -> Product {
        let ledger = StockLedger::new(ctx.store.clone());
        ledger.register_product(&product).await.unwrap();
        for (qty, cost) in batches {
            ledger.receive(product.id, *qty, *cost).await.unwrap();
        }
        product
    }

    /// Place an order straight into the store, bypassing checkout.
    async fn insert_order(ctx: &EngineContext, product: &Product, quantity: Decimal) -> OrderId {
        let id = OrderId::new();
        let mut order = Order::empty(id);
        order
            .execute(&OrderCommand::Place {
                header: OrderHeader {
                    id,
                    customer_id: CustomerId::new(),
                    cart_id: None,
                    payment_method: "cash".into(),
                    payment_kind: PaymentKind::OnDelivery,
                    delivery_method: "pickup".into(),
                    delivery_price: Decimal::ZERO,
                    delivery_address: DeliveryAddress::snapshot(
                        Address::default(),
                        None,
                        Utc::now(),
                    ),
                    receiver: receiver(),
                    created_at: Utc::now(),
                },
                lines: vec![OrderLine::from_product(id, product, quantity)],
            })
            .unwrap();
        let mut tx = ctx.store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();
        tx.commit().await.unwrap();
        id
    }

    async fn batch_quantities(ctx: &EngineContext, product_id: ProductId) -> Vec<Decimal> {
        let mut tx = ctx.store.begin().await.unwrap();
        tx.stock_batches(product_id)
            .await
            .unwrap()
            .iter()
            .map(|b| b.quantity)
            .collect()
    }

    #[tokio::test]
    async fn weight_product_from_cart_to_confirmed_order() {
        let ctx = context(courier_config());
        let cheese = register(
            &ctx,
            Product::new(ProductId::new(), "Cheese", dec!(12.5)).sold_by_weight(),
            &[(dec!(1.0), dec!(8)), (dec!(2.0), dec!(9))],
        )
        .await;
        let carts = CartEngine::new(ctx.clone());
        let orders = OrderEngine::new(ctx.clone());
        let token = ClientToken::new("shopper").unwrap();

        let view = carts.add(&token, cheese.id, dec!(1.4)).await.unwrap();
        assert_eq!(view.totals.price, dec!(17.50));

        let placed = orders
            .create_from_cart(&token, checkout("courier"))
            .await
            .unwrap();
        let order = placed.order;
        assert_eq!(order.state(), OrderState::Created);
        assert_eq!(order.price(), dec!(12.5) * dec!(1.4));
        assert_eq!(order.delivery_price(), dec!(4.90));
        assert_eq!(order.full_price(), dec!(22.40));
        assert_eq!(
            order.header().unwrap().delivery_address.normalized,
            "LV, Riga, Brivibas 1"
        );

        let ledger = StockLedger::new(ctx.store.clone());
        assert_eq!(
            ledger.available_quantity(cheese.id).await.unwrap(),
            Availability::Limited(dec!(1.6))
        );

        let confirmed = orders.confirm(order.order_id()).await.unwrap();
        assert!(confirmed.is_fully_reduced());
        // 1.0 @ 8 + 0.4 @ 9
        assert_eq!(confirmed.realized_cost(), dec!(11.6));
        assert_eq!(
            batch_quantities(&ctx, cheese.id).await,
            vec![dec!(0), dec!(1.6)]
        );
        assert_eq!(
            ledger.available_quantity(cheese.id).await.unwrap(),
            Availability::Limited(dec!(1.6))
        );

        let stored = orders.order(order.order_id()).await.unwrap();
        assert_eq!(stored, confirmed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirmations_never_oversell() {
        let ctx = context(CommerceConfig::default());
        let lamp = register(
            &ctx,
            Product::new(ProductId::new(), "Lamp", dec!(30)),
            &[(dec!(4), dec!(10))],
        )
        .await;
        let first = insert_order(&ctx, &lamp, dec!(3)).await;
        let second = insert_order(&ctx, &lamp, dec!(3)).await;

        let orders = OrderEngine::new(ctx.clone());
        let (a, b) = tokio::join!(orders.confirm(first), orders.confirm(second));

        let (ok, failed, failed_id) = match (a, b) {
            (Ok(o), Err(e)) => (o, e, second),
            (Err(e), Ok(o)) => (o, e, first),
            other => panic!("expected exactly one confirmation to succeed, got {other:?}"),
        };
        assert_eq!(ok.state(), OrderState::Confirmed);
        assert_eq!(failed.kind(), ErrorKind::InsufficientStock);
        assert!(failed.is_retryable());

        assert_eq!(batch_quantities(&ctx, lamp.id).await, vec![dec!(1)]);
        let loser = orders.order(failed_id).await.unwrap();
        assert_eq!(loser.state(), OrderState::Created);
        assert!(loser.lines().iter().all(|l| !l.stock_reduced));
    }

    #[tokio::test]
    async fn anonymous_cart_round_trip_drops_lines_that_sold_out() {
        let ctx = context(CommerceConfig::default());
        let tea = register(
            &ctx,
            Product::new(ProductId::new(), "Tea", dec!(4)),
            &[(dec!(5), dec!(1))],
        )
        .await;
        let vase = register(
            &ctx,
            Product::new(ProductId::new(), "Vase", dec!(40)),
            &[(dec!(1), dec!(20))],
        )
        .await;
        let carts = CartEngine::new(ctx.clone());
        let orders = OrderEngine::new(ctx.clone());

        let browsing = ClientToken::new("browsing").unwrap();
        let mut snapshot = AnonymousCartSnapshot::default();
        snapshot.put(tea.id, dec!(2));
        snapshot.put(vase.id, dec!(1));
        ctx.sessions.put_snapshot(&browsing, snapshot);

        // Someone else buys the last vase.
        let rival = ClientToken::new("rival").unwrap();
        carts.add(&rival, vase.id, dec!(1)).await.unwrap();
        orders
            .create_from_cart(&rival, checkout("pickup"))
            .await
            .unwrap();

        let persisted = carts.persist(&browsing).await.unwrap();
        let reloaded = carts.load(&browsing).await.unwrap();
        assert_eq!(persisted, reloaded);

        let products: Vec<ProductId> = reloaded.lines.iter().map(|l| l.product.id).collect();
        assert_eq!(products, vec![tea.id]);
        assert_eq!(reloaded.lines[0].amount, dec!(2));

        let audit = carts.audit_log(&browsing).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::AutoDrop);
    }

    #[tokio::test]
    async fn checkout_of_anonymous_cart_materializes_it() {
        let ctx = context(CommerceConfig::default());
        let tea = register(
            &ctx,
            Product::new(ProductId::new(), "Tea", dec!(4)),
            &[(dec!(5), dec!(1))],
        )
        .await;
        let token = ClientToken::new("guest").unwrap();
        let mut snapshot = AnonymousCartSnapshot::default();
        snapshot.put(tea.id, dec!(3));
        ctx.sessions.put_snapshot(&token, snapshot);

        let placed = OrderEngine::new(ctx.clone())
            .create_from_cart(&token, checkout("pickup"))
            .await
            .unwrap();
        assert_eq!(placed.order.price(), dec!(12));
        assert!(ctx.sessions.snapshot(&token).is_none());
        assert_eq!(ctx.sessions.association(&token).unwrap().cart_id, None);
    }

    #[tokio::test]
    async fn overcommitted_stock_clamps_to_zero() {
        let ctx = context(CommerceConfig::default());
        let lamp = register(
            &ctx,
            Product::new(ProductId::new(), "Lamp", dec!(30)),
            &[(dec!(2), dec!(10))],
        )
        .await;
        insert_order(&ctx, &lamp, dec!(5)).await;

        let ledger = StockLedger::new(ctx.store.clone());
        assert_eq!(
            ledger.available_quantity(lamp.id).await.unwrap(),
            Availability::Limited(Decimal::ZERO)
        );

        let token = ClientToken::new("late").unwrap();
        let err = CartEngine::new(ctx.clone())
            .add(&token, lamp.id, dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Cart(CartModificationError::ExceedsAvailability { .. })
        ));
    }

    struct BrokenCourier;

    #[async_trait]
    impl DeliveryProvider for BrokenCourier {
        async fn compute_delivery(
            &self,
            _request: &DeliveryRequest<'_>,
        ) -> Result<DeliveryQuote, CollaboratorError> {
            Err(CollaboratorError::Delivery {
                provider: "broken".into(),
                message: "timeout".into(),
            })
        }
    }

    #[tokio::test]
    async fn delivery_failure_leaves_cart_and_stock_untouched() {
        let mut config = CommerceConfig::default();
        config.delivery_methods.push(DeliveryMethodConfig {
            key: "express".into(),
            name: "Express".into(),
            provider: "broken".into(),
            options: serde_json::Value::Null,
        });
        let ctx = context(config).with_providers(
            ProviderRegistry::with_builtins().with_delivery("broken", Arc::new(BrokenCourier)),
        );
        let lamp = register(
            &ctx,
            Product::new(ProductId::new(), "Lamp", dec!(30)),
            &[(dec!(2), dec!(10))],
        )
        .await;
        let carts = CartEngine::new(ctx.clone());
        let token = ClientToken::new("unlucky").unwrap();
        let before = carts.add(&token, lamp.id, dec!(2)).await.unwrap();

        let err = OrderEngine::new(ctx.clone())
            .create_from_cart(&token, checkout("express"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Collaborator);

        assert_eq!(carts.load(&token).await.unwrap(), before);
        assert_eq!(
            StockLedger::new(ctx.store.clone())
                .available_quantity(lamp.id)
                .await
                .unwrap(),
            Availability::Limited(dec!(2))
        );
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<(Option<OrderState>, OrderState)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn order_changed(
            &self,
            order: &Order,
            from: Option<OrderState>,
        ) -> Result<(), CollaboratorError> {
            self.seen.lock().unwrap().push((from, order.state()));
            Err(CollaboratorError::Notification("mailer offline".into()))
        }
    }

    #[tokio::test]
    async fn notifier_sees_every_change_and_its_failures_are_swallowed() {
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = context(CommerceConfig::default()).with_notifier(notifier.clone());
        let lamp = register(
            &ctx,
            Product::new(ProductId::new(), "Lamp", dec!(30)),
            &[(dec!(2), dec!(10))],
        )
        .await;
        let token = ClientToken::new("notified").unwrap();
        CartEngine::new(ctx.clone())
            .add(&token, lamp.id, dec!(1))
            .await
            .unwrap();
        let orders = OrderEngine::new(ctx.clone());
        let placed = orders
            .create_from_cart(&token, checkout("pickup"))
            .await
            .unwrap();
        orders.confirm(placed.order.order_id()).await.unwrap();
        orders
            .transition(placed.order.order_id(), OrderState::Shipped)
            .await
            .unwrap();

        let seen = notifier.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (None, OrderState::Created),
                (Some(OrderState::Created), OrderState::Confirmed),
                (Some(OrderState::Confirmed), OrderState::Shipped),
            ]
        );
    }

    /// Counts calls and settles each payment with `outcome`, or fails when
    /// `outcome` is `None`.
    struct Gateway {
        calls: AtomicUsize,
        outcome: Option<(bool, bool)>,
    }

    impl Gateway {
        fn paying() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome: Some((true, true)),
            }
        }

        fn down() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome: None,
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for Gateway {
        async fn create_payment(
            &self,
            method: &str,
            order: &Order,
        ) -> Result<Payment, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (is_completed, is_paid) = self.outcome.ok_or_else(|| CollaboratorError::Payment {
                provider: "gateway".into(),
                message: "503 service unavailable".into(),
            })?;
            Ok(Payment {
                provider: "gateway".into(),
                reference: Some(format!("{method}-{}", order.order_id())),
                is_completed,
                is_paid,
                submit_url: None,
            })
        }
    }

    fn gateway_context(kind: PaymentKind, key: &str, gateway: Arc<Gateway>) -> EngineContext {
        let mut config = CommerceConfig::default();
        config.payment_methods.push(PaymentMethodConfig {
            key: key.into(),
            name: key.to_uppercase(),
            kind,
            provider: "gateway".into(),
        });
        context(config).with_providers(ProviderRegistry::with_builtins().with_payment("gateway", gateway))
    }

    #[tokio::test]
    async fn online_order_holds_stock_until_it_fails() {
        let gateway = Arc::new(Gateway::paying());
        let ctx = gateway_context(PaymentKind::Online, "card", gateway.clone());
        let lamp = register(
            &ctx,
            Product::new(ProductId::new(), "Lamp", dec!(30)),
            &[(dec!(5), dec!(10))],
        )
        .await;
        let carts = CartEngine::new(ctx.clone());
        let orders = OrderEngine::new(ctx.clone());
        let ledger = StockLedger::new(ctx.store.clone());

        let buyer = ClientToken::new("online-buyer").unwrap();
        carts.add(&buyer, lamp.id, dec!(2)).await.unwrap();
        let mut card = checkout("pickup");
        card.payment_method = Some("card".into());
        let placed = orders.create_from_cart(&buyer, card).await.unwrap();
        let id = placed.order.order_id();
        assert_eq!(placed.order.state(), OrderState::NcPaid);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);

        for to in [OrderState::NcConfirmed, OrderState::NcShipped] {
            let order = orders.transition(id, to).await.unwrap();
            assert_eq!(order.state(), to);
            assert!(order.lines().iter().all(|l| !l.stock_reduced));
            assert_eq!(
                ledger.available_quantity(lamp.id).await.unwrap(),
                Availability::Limited(dec!(3))
            );
        }
        assert_eq!(batch_quantities(&ctx, lamp.id).await, vec![dec!(5)]);

        let rival = ClientToken::new("rival").unwrap();
        let err = carts.add(&rival, lamp.id, dec!(4)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Cart(CartModificationError::ExceedsAvailability { .. })
        ));
        carts.add(&rival, lamp.id, dec!(3)).await.unwrap();

        orders.transition(id, OrderState::NcRejected).await.unwrap();
        assert_eq!(
            ledger.available_quantity(lamp.id).await.unwrap(),
            Availability::Limited(dec!(5))
        );
    }

    #[tokio::test]
    async fn payment_reference_is_kept_across_transitions() {
        let gateway = Arc::new(Gateway::paying());
        let ctx = gateway_context(PaymentKind::Online, "card", gateway);
        let tea = register(
            &ctx,
            Product::new(ProductId::new(), "Tea", dec!(4)),
            &[(dec!(5), dec!(1))],
        )
        .await;
        let token = ClientToken::new("payer").unwrap();
        CartEngine::new(ctx.clone())
            .add(&token, tea.id, dec!(1))
            .await
            .unwrap();
        let orders = OrderEngine::new(ctx.clone());
        let mut card = checkout("pickup");
        card.payment_method = Some("card".into());
        let placed = orders.create_from_cart(&token, card).await.unwrap();
        let id = placed.order.order_id();
        let reference = format!("card-{id}");
        assert_eq!(placed.payment.reference.as_deref(), Some(reference.as_str()));

        let stored = orders.order(id).await.unwrap();
        assert_eq!(stored.payment_reference(), Some(reference.as_str()));
        assert_eq!(stored, placed.order);

        orders.transition(id, OrderState::NcConfirmed).await.unwrap();
        let confirmed = orders.order(id).await.unwrap();
        assert_eq!(confirmed.state(), OrderState::NcConfirmed);
        assert_eq!(confirmed.payment_reference(), Some(reference.as_str()));
    }

    #[tokio::test]
    async fn on_delivery_checkout_succeeds_while_the_gateway_is_down() {
        let gateway = Arc::new(Gateway::down());
        let ctx = gateway_context(PaymentKind::OnDelivery, "cod", gateway.clone());
        let lamp = register(
            &ctx,
            Product::new(ProductId::new(), "Lamp", dec!(30)),
            &[(dec!(2), dec!(10))],
        )
        .await;
        let token = ClientToken::new("cod-buyer").unwrap();
        CartEngine::new(ctx.clone())
            .add(&token, lamp.id, dec!(1))
            .await
            .unwrap();

        let mut cod = checkout("pickup");
        cod.payment_method = Some("cod".into());
        let placed = OrderEngine::new(ctx.clone())
            .create_from_cart(&token, cod)
            .await
            .unwrap();

        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        assert_eq!(placed.order.state(), OrderState::Created);
        assert!(placed.payment.is_completed && !placed.payment.is_paid);
        assert_eq!(placed.order.payment_reference(), None);
        assert_eq!(
            StockLedger::new(ctx.store.clone())
                .available_quantity(lamp.id)
                .await
                .unwrap(),
            Availability::Limited(dec!(1))
        );
    }

    #[tokio::test]
    async fn online_checkout_fails_cleanly_while_the_gateway_is_down() {
        let gateway = Arc::new(Gateway::down());
        let ctx = gateway_context(PaymentKind::Online, "card", gateway.clone());
        let lamp = register(
            &ctx,
            Product::new(ProductId::new(), "Lamp", dec!(30)),
            &[(dec!(2), dec!(10))],
        )
        .await;
        let carts = CartEngine::new(ctx.clone());
        let token = ClientToken::new("card-buyer").unwrap();
        let before = carts.add(&token, lamp.id, dec!(1)).await.unwrap();

        let mut card = checkout("pickup");
        card.payment_method = Some("card".into());
        let err = OrderEngine::new(ctx.clone())
            .create_from_cart(&token, card)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Collaborator);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(carts.load(&token).await.unwrap(), before);
        assert_eq!(
            StockLedger::new(ctx.store.clone())
                .available_quantity(lamp.id)
                .await
                .unwrap(),
            Availability::Limited(dec!(2))
        );
    }
}
