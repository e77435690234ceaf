//! Orders domain module.
//!
//! The order state machine, the order aggregate with its priced line items,
//! and the delivery address snapshot. Deterministic domain logic only.

pub mod address;
pub mod error;
pub mod order;
pub mod state;

pub use address::{Address, DeliveryAddress, Receiver};
pub use error::OrderError;
pub use order::{Order, OrderCommand, OrderEvent, OrderHeader, OrderLine};
pub use state::{OrderState, PaymentKind};
