//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use lifecycle::{GatewayError, LifecycleError};
use stock_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Checkout lifecycle error.
    Lifecycle(LifecycleError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Lifecycle(err) => lifecycle_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn lifecycle_error_to_response(err: LifecycleError) -> (StatusCode, String) {
    let status = match &err {
        LifecycleError::MalformedReference(_) => StatusCode::BAD_REQUEST,
        LifecycleError::Checkout(checkout_err) => checkout_status(checkout_err),
        LifecycleError::Gateway(GatewayError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
        LifecycleError::Gateway(_) => StatusCode::BAD_GATEWAY,
        LifecycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    (status, err.to_string())
}

fn checkout_status(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::NoItems
        | CheckoutError::InvalidQuantity { .. }
        | CheckoutError::InvalidVariant(_)
        | CheckoutError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        CheckoutError::InsufficientStock { .. }
        | CheckoutError::DuplicateSession(_)
        | CheckoutError::ReservationMissing { .. }
        | CheckoutError::SessionNotActive(_)
        | CheckoutError::AlreadyCommitted(_) => StatusCode::CONFLICT,
        CheckoutError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::TransactionAborted { .. }
        | CheckoutError::BulkWrite(_)
        | CheckoutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        ApiError::Lifecycle(err)
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Lifecycle(err.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Lifecycle(err.into())
    }
}
