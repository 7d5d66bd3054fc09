//! Lifecycle error types.

use checkout::CheckoutError;
use common::SessionId;
use stock_store::StoreError;
use thiserror::Error;

/// Errors reported by the payment gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The gateway could not be reached or timed out. Safe to retry.
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway does not know the session.
    #[error("Payment gateway session not found: {0}")]
    SessionNotFound(SessionId),

    /// The gateway refused the request.
    #[error("Payment gateway rejected the request: {0}")]
    Rejected(String),
}

/// Errors that can occur while driving a checkout through its lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// An administrative reference did not resolve to a session identifier.
    #[error("Malformed session reference: {0}")]
    MalformedReference(String),

    /// Payment gateway error.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Checkout error.
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// Returns true if an order already exists for the session.
    pub fn is_already_committed(&self) -> bool {
        matches!(self, LifecycleError::Checkout(CheckoutError::AlreadyCommitted(_)))
    }
}

/// Convenience type alias for lifecycle results.
pub type Result<T> = std::result::Result<T, LifecycleError>;
