//! Inventory domain module: stock batches, availability arithmetic and the
//! oldest-first consumption walk.
//!
//! Pure, deterministic logic (no IO, no storage, no locking). Locking and
//! persistence of consumed batches are the infrastructure layer's job.

pub mod batch;
pub mod error;
pub mod ledger;
pub mod reduction;

pub use batch::StockBatch;
pub use error::InventoryError;
pub use ledger::{Availability, LedgerSnapshot, availability};
pub use reduction::{Consumption, ReductionOutcome, consume_oldest_first};
