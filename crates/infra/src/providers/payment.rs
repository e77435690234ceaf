use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stockcart_orders::Order;

use crate::error::CollaboratorError;

/// Payment intent or result reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub provider: String,
    /// Provider-side reference, if any.
    pub reference: Option<String>,
    /// The provider reached a final outcome.
    pub is_completed: bool,
    pub is_paid: bool,
    /// Where to send the client to pay, for online providers.
    pub submit_url: Option<String>,
}

impl Payment {
    /// Payment collected on delivery: complete, unpaid, no redirect.
    pub fn on_delivery(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reference: None,
            is_completed: true,
            is_paid: false,
            submit_url: None,
        }
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a payment for a freshly placed order.
    async fn create_payment(&self, method: &str, order: &Order)
    -> Result<Payment, CollaboratorError>;
}

/// Offline payment collected on delivery: complete, unpaid, no redirect.
#[derive(Debug, Copy, Clone, Default)]
pub struct CashOnDelivery;

impl CashOnDelivery {
    pub const KEY: &'static str = "cash";
}

#[async_trait]
impl PaymentProvider for CashOnDelivery {
    async fn create_payment(
        &self,
        _method: &str,
        order: &Order,
    ) -> Result<Payment, CollaboratorError> {
        Ok(Payment {
            reference: Some(order.order_id().to_string()),
            ..Payment::on_delivery(Self::KEY)
        })
    }
}
