//! `stockcart-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod event;
pub mod id;
pub mod quantity;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use event::DomainEvent;
pub use id::{
    CartId, CustomerId, DeliveryAddressId, OrderId, OrderLineId, ProductId, StockBatchId,
};
pub use rust_decimal::Decimal;
