//! Infrastructure layer: stores, collaborators, configuration and the engines
//! that tie the domain crates together.

pub mod cart_engine;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod order_engine;
pub mod providers;
pub mod reduction;
pub mod session_store;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use cart_engine::{CartEngine, CartView};
pub use config::{CommerceConfig, ConfigError, DeliveryMethodConfig, PaymentMethodConfig};
pub use context::EngineContext;
pub use error::{CollaboratorError, EngineError, ErrorKind, StoreError};
pub use identity::IdentityEnricher;
pub use ledger::StockLedger;
pub use order_engine::{Checkout, OrderEngine, PlacedOrder, payment_transition};
pub use reduction::reduce_order_stock;
pub use session_store::{InMemorySessionStore, SessionStore};
pub use store::{InMemoryStore, PostgresStore, Store, StoreTx};
