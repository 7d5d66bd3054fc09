//! Checkout initiation and session lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{SessionId, UserId};
use lifecycle::PaymentGateway;
use serde::{Deserialize, Serialize};
use stock_store::{CheckoutSession, CheckoutStore, LineItem};

use super::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub user_id: String,
    pub items: Vec<LineItemRequest>,
}

/// Quantities are accepted as signed integers so that negative values are
/// reported as a bad request rather than a deserialization failure.
#[derive(Deserialize)]
pub struct LineItemRequest {
    pub product_id: String,
    pub quantity: i64,
    pub variant: Option<String>,
}

impl LineItemRequest {
    fn into_line_item(self) -> Result<LineItem, ApiError> {
        let quantity = u32::try_from(self.quantity)
            .ok()
            .filter(|quantity| *quantity > 0)
            .ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Invalid quantity {} for product {}",
                    self.quantity, self.product_id
                ))
            })?;

        Ok(LineItem {
            product_id: self.product_id.into(),
            quantity,
            variant: self.variant,
        })
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub session_id: SessionId,
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub items: Vec<LineItem>,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub stock_released: bool,
}

impl From<CheckoutSession> for SessionResponse {
    fn from(session: CheckoutSession) -> Self {
        Self {
            session_id: session.session_id,
            user_id: session.user_id,
            status: session.status.as_str().to_string(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            stock_released: session.stock_released,
        }
    }
}

// -- Handlers --

/// POST /checkout — hold stock for the items and open a payment session.
#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn create<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError>
where
    S: CheckoutStore,
    G: PaymentGateway + 'static,
{
    if req.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    let user_id = UserId::new(req.user_id);
    let items = req
        .items
        .into_iter()
        .map(LineItemRequest::into_line_item)
        .collect::<Result<Vec<_>, _>>()?;

    let started = state.coordinator.begin_checkout(&user_id, &items).await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            session_id: started.session_id,
            url: started.url,
            expires_at: started.expires_at,
            items: started.items,
        }),
    ))
}

/// GET /checkout-sessions/{id} — current status of a checkout session.
#[tracing::instrument(skip(state))]
pub async fn get_session<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError>
where
    S: CheckoutStore,
    G: PaymentGateway + 'static,
{
    let session_id = SessionId::new(id);
    let session = state
        .coordinator
        .sessions()
        .get(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Checkout session not found: {session_id}")))?;

    Ok(Json(session.into()))
}
