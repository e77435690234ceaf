//! Cart domain module.
//!
//! Business rules for carts, implemented as deterministic domain logic: the
//! amount-check rule, line upserts, stale-line reconciliation, the audit trail
//! and the anonymous → persisted upgrade. No IO, no storage.

pub mod audit;
pub mod cart;
pub mod customer;
pub mod error;
pub mod session;

pub use audit::{AuditAction, CartAuditEntry};
pub use cart::{
    Cart, CartCommand, CartDetails, CartEvent, CartLine, CartTotals, ContactDetails, check_amount,
};
pub use customer::{ClientIdentity, Customer};
pub use error::CartModificationError;
pub use session::{AnonymousCartSnapshot, ClientAssociation, ClientToken, Materialized, SnapshotLine};
