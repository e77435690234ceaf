//! External collaborators: delivery pricing, payment and notifications.
//!
//! Providers are registered under a provider key; configured delivery and
//! payment methods point at a provider key (see `config`).

pub mod delivery;
pub mod notify;
pub mod payment;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CollaboratorError;

pub use delivery::{ConstantPriceDelivery, DeliveryProvider, DeliveryQuote, DeliveryRequest};
pub use notify::{Notifier, TracingNotifier};
pub use payment::{CashOnDelivery, Payment, PaymentProvider};

/// Constructor-injected provider lookup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    delivery: HashMap<String, Arc<dyn DeliveryProvider>>,
    payment: HashMap<String, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in providers under their default keys.
    pub fn with_builtins() -> Self {
        Self::new()
            .with_delivery(ConstantPriceDelivery::KEY, Arc::new(ConstantPriceDelivery))
            .with_payment(CashOnDelivery::KEY, Arc::new(CashOnDelivery))
    }

    pub fn with_delivery(
        mut self,
        key: impl Into<String>,
        provider: Arc<dyn DeliveryProvider>,
    ) -> Self {
        self.delivery.insert(key.into(), provider);
        self
    }

    pub fn with_payment(mut self, key: impl Into<String>, provider: Arc<dyn PaymentProvider>) -> Self {
        self.payment.insert(key.into(), provider);
        self
    }

    pub fn delivery(&self, key: &str) -> Result<Arc<dyn DeliveryProvider>, CollaboratorError> {
        self.delivery
            .get(key)
            .cloned()
            .ok_or_else(|| CollaboratorError::UnknownMethod {
                kind: "delivery provider",
                key: key.to_string(),
            })
    }

    pub fn payment(&self, key: &str) -> Result<Arc<dyn PaymentProvider>, CollaboratorError> {
        self.payment
            .get(key)
            .cloned()
            .ok_or_else(|| CollaboratorError::UnknownMethod {
                kind: "payment provider",
                key: key.to_string(),
            })
    }
}

impl core::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut delivery: Vec<&String> = self.delivery.keys().collect();
        let mut payment: Vec<&String> = self.payment.keys().collect();
        delivery.sort();
        payment.sort();
        f.debug_struct("ProviderRegistry")
            .field("delivery", &delivery)
            .field("payment", &payment)
            .finish()
    }
}
