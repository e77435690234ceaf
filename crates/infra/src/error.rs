//! Error surface of the engines.
//!
//! Every layer keeps its own focused error type; [`EngineError`] wraps them
//! and classifies each failure into an [`ErrorKind`] so callers can react
//! without matching on the inner types.

use thiserror::Error;

use stockcart_cart::CartModificationError;
use stockcart_core::DomainError;
use stockcart_inventory::InventoryError;
use stockcart_orders::OrderError;

/// Storage-layer failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic version check or unique constraint lost a race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded into the domain model.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Failure of an external hook (delivery pricing, payment, notification).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("unknown {kind} method '{key}'")]
    UnknownMethod { kind: &'static str, key: String },

    #[error("delivery provider '{provider}' failed: {message}")]
    Delivery { provider: String, message: String },

    #[error("payment provider '{provider}' failed: {message}")]
    Payment { provider: String, message: String },

    #[error("notifier failed: {0}")]
    Notification(String),
}

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// User-correctable input problem; nothing changed.
    Validation,
    /// Stock reduction was attempted twice for a line.
    IdempotencyViolation,
    /// Not enough stock at consumption time. Retry after stock changes.
    InsufficientStock,
    Collaborator,
    NotFound,
    Storage,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Cart(#[from] CartModificationError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Cart(_) | EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Order(OrderError::StockAlreadyReduced { .. }) => {
                ErrorKind::IdempotencyViolation
            }
            EngineError::Order(OrderError::NotPlaced(_) | OrderError::UnknownLine { .. }) => {
                ErrorKind::NotFound
            }
            EngineError::Order(_) => ErrorKind::Validation,
            EngineError::Inventory(InventoryError::InsufficientStock { .. }) => {
                ErrorKind::InsufficientStock
            }
            EngineError::Inventory(_) => ErrorKind::Validation,
            EngineError::Domain(DomainError::Conflict(_)) => ErrorKind::Storage,
            EngineError::Domain(_) => ErrorKind::Validation,
            EngineError::Collaborator(CollaboratorError::UnknownMethod { .. }) => {
                ErrorKind::Validation
            }
            EngineError::Collaborator(_) => ErrorKind::Collaborator,
            EngineError::Store(StoreError::NotFound(_)) | EngineError::NotFound(_) => {
                ErrorKind::NotFound
            }
            EngineError::Store(_) => ErrorKind::Storage,
        }
    }

    /// Whether the same call may succeed later without different input.
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::InsufficientStock | ErrorKind::Collaborator => true,
            ErrorKind::Storage => !matches!(self, EngineError::Store(StoreError::Corrupt(_))),
            ErrorKind::Validation | ErrorKind::IdempotencyViolation | ErrorKind::NotFound => {
                false
            }
        }
    }
}
