//! Checkout error types.

use common::{ProductId, SessionId};
use stock_store::{SessionStatus, StockTarget, StoreError};
use thiserror::Error;

/// A batch of the bulk writer failed; later batches were not attempted.
#[derive(Debug, Error)]
#[error("Bulk write failed at batch {batch}: {source}")]
pub struct BulkWriteError {
    /// 1-indexed number of the failing batch.
    pub batch: usize,
    pub source: StoreError,
}

/// Errors that can occur during checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// No line items were given.
    #[error("No line items given")]
    NoItems,

    /// A line item requested a zero quantity.
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// A line item named an empty variant label.
    #[error("Empty variant label for product {0}")]
    InvalidVariant(ProductId),

    /// The reservation could not be fully satisfied.
    #[error("Insufficient stock for {target}: requested {requested}")]
    InsufficientStock { target: StockTarget, requested: u32 },

    /// A checkout session with this identifier already exists.
    #[error("Checkout session already exists: {0}")]
    DuplicateSession(SessionId),

    /// The checkout session does not exist.
    #[error("Checkout session not found: {0}")]
    SessionNotFound(SessionId),

    /// Sessions only ever move from active to a terminal state.
    #[error("Invalid transition of checkout session {session_id} to {to}")]
    InvalidTransition {
        session_id: SessionId,
        to: SessionStatus,
    },

    /// The session does not hold the purchased amount on a record it is committing.
    #[error("Session {session_id} holds no matching reservation for {target}")]
    ReservationMissing {
        session_id: SessionId,
        target: StockTarget,
    },

    /// The session is no longer active.
    #[error("Checkout session {0} is not active")]
    SessionNotActive(SessionId),

    /// An order already exists for the session.
    #[error("Checkout session {0} has already been committed")]
    AlreadyCommitted(SessionId),

    /// The commit transaction was rolled back.
    #[error("Commit of checkout session {session_id} aborted: {reason}")]
    TransactionAborted { session_id: SessionId, reason: String },

    /// Bulk write error.
    #[error(transparent)]
    BulkWrite(#[from] BulkWriteError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Returns true for failures caused by the request itself rather than
    /// by the system.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CheckoutError::NoItems
                | CheckoutError::InvalidQuantity { .. }
                | CheckoutError::InvalidVariant(_)
                | CheckoutError::InsufficientStock { .. }
        )
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
