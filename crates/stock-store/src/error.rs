use thiserror::Error;

use crate::{ProductId, SessionId};

/// Errors that can occur when interacting with the checkout store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A checkout session with this identifier already exists.
    #[error("Checkout session already exists: {0}")]
    DuplicateSession(SessionId),

    /// An order for this checkout session already exists.
    #[error("Order already exists for checkout session {0}")]
    DuplicateOrder(SessionId),

    /// The product has no stock record.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// A persisted row could not be mapped back to a valid record.
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    /// The backend refused or failed the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
