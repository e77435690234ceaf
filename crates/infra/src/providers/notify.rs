use async_trait::async_trait;
use tracing::info;

use stockcart_orders::{Order, OrderState};

use crate::error::CollaboratorError;

/// Fire-and-forget hook called after an order change commits.
///
/// Errors are logged by the engine and otherwise ignored.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// `from` is `None` for a newly created order.
    async fn order_changed(
        &self,
        order: &Order,
        from: Option<OrderState>,
    ) -> Result<(), CollaboratorError>;
}

/// Logs every order change.
#[derive(Debug, Copy, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn order_changed(
        &self,
        order: &Order,
        from: Option<OrderState>,
    ) -> Result<(), CollaboratorError> {
        match from {
            Some(from) => info!(
                order_id = %order.order_id(),
                from = %from,
                to = %order.state(),
                "order transitioned"
            ),
            None => info!(
                order_id = %order.order_id(),
                state = %order.state(),
                full_price = %order.full_price(),
                "order created"
            ),
        }
        Ok(())
    }
}
