//! Everything the engines need, built once and passed in.

use std::sync::Arc;

use tracing::{info, warn};

use stockcart_catalog::{PackagingSizer, StackingSizer};
use stockcart_orders::{Order, OrderState};

use crate::config::{CommerceConfig, DeliveryMethodConfig, PaymentMethodConfig};
use crate::error::{CollaboratorError, EngineError};
use crate::providers::{Notifier, ProviderRegistry, TracingNotifier};
use crate::session_store::{InMemorySessionStore, SessionStore};
use crate::store::{InMemoryStore, PostgresStore, Store};

#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<dyn SessionStore>,
    pub providers: ProviderRegistry,
    pub notifier: Arc<dyn Notifier>,
    pub sizer: Arc<dyn PackagingSizer>,
    pub config: Arc<CommerceConfig>,
}

impl EngineContext {
    /// Context with built-in providers, the tracing notifier and the stacking
    /// sizer.
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<dyn SessionStore>,
        config: CommerceConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            providers: ProviderRegistry::with_builtins(),
            notifier: Arc::new(TracingNotifier),
            sizer: Arc::new(StackingSizer),
            config: Arc::new(config),
        }
    }

    /// In-memory stores with the default configuration.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemorySessionStore::new()),
            CommerceConfig::default(),
        )
    }

    /// Composition root: initialize logging, then pick the store from
    /// `config.persistence`. The Postgres schema is applied on connect.
    pub async fn from_config(config: CommerceConfig) -> Result<Self, EngineError> {
        stockcart_observability::init_with(&config.log);

        let store: Arc<dyn Store> = match (
            config.persistence.use_persistent_stores,
            config.persistence.database_url.as_deref(),
        ) {
            (true, Some(url)) => {
                let store = PostgresStore::connect(url).await?;
                store.migrate().await?;
                info!("using postgres store");
                Arc::new(store)
            }
            (true, None) => {
                return Err(EngineError::validation(
                    "DATABASE_URL must be set when USE_PERSISTENT_STORES=true",
                ));
            }
            (false, _) => {
                info!("using in-memory store");
                Arc::new(InMemoryStore::new())
            }
        };
        Ok(Self::new(
            store,
            Arc::new(InMemorySessionStore::new()),
            config,
        ))
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_sizer(mut self, sizer: Arc<dyn PackagingSizer>) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn payment_method(&self, key: &str) -> Result<&PaymentMethodConfig, CollaboratorError> {
        self.config
            .payment_method(key)
            .ok_or_else(|| CollaboratorError::UnknownMethod {
                kind: "payment",
                key: key.to_string(),
            })
    }

    pub fn delivery_method(&self, key: &str) -> Result<&DeliveryMethodConfig, CollaboratorError> {
        self.config
            .delivery_method(key)
            .ok_or_else(|| CollaboratorError::UnknownMethod {
                kind: "delivery",
                key: key.to_string(),
            })
    }

    /// Run the notifier. Failures are logged and dropped.
    pub async fn notify(&self, order: &Order, from: Option<OrderState>) {
        if let Err(error) = self.notifier.order_changed(order, from).await {
            warn!(order_id = %order.order_id(), %error, "notifier failed");
        }
    }
}

impl core::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EngineContext")
            .field("providers", &self.providers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
