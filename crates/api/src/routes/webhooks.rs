//! Payment gateway webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::{OrderId, SessionId};
use lifecycle::{ConfirmationOutcome, PaymentGateway, SessionExpiry};
use serde::{Deserialize, Serialize};
use stock_store::CheckoutStore;

use super::AppState;
use crate::error::ApiError;

pub const SESSION_COMPLETED: &str = "checkout.session.completed";
pub const SESSION_EXPIRED: &str = "checkout.session.expired";

#[derive(Deserialize)]
pub struct PaymentEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookResponse {
    fn outcome(outcome: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            order_id: None,
            reason: None,
        }
    }
}

/// POST /webhooks/payment — payment confirmation and expiry events.
///
/// Deliveries are at least once; repeated events are answered with a
/// `duplicate` or `already_<state>` outcome and have no further effect.
#[tracing::instrument(skip(state, event), fields(event_type = %event.event_type, session_id = %event.session_id))]
pub async fn handle<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Json(event): Json<PaymentEvent>,
) -> Result<Json<WebhookResponse>, ApiError>
where
    S: CheckoutStore,
    G: PaymentGateway + 'static,
{
    if event.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("session_id is required".to_string()));
    }
    let session_id = SessionId::new(event.session_id);

    let response = match event.event_type.as_str() {
        SESSION_COMPLETED => match state.coordinator.confirm_payment(&session_id).await? {
            ConfirmationOutcome::Committed(order) => WebhookResponse {
                order_id: Some(order.id),
                ..WebhookResponse::outcome("committed")
            },
            ConfirmationOutcome::Duplicate(reason) => WebhookResponse {
                reason: Some(reason.as_str().to_string()),
                ..WebhookResponse::outcome("duplicate")
            },
        },
        SESSION_EXPIRED => match state.reconciler.expire_session(&session_id).await? {
            SessionExpiry::Expired { .. } => WebhookResponse::outcome("expired"),
            SessionExpiry::AlreadyTerminal(status) => {
                WebhookResponse::outcome(format!("already_{status}"))
            }
        },
        other => {
            tracing::debug!(event_type = other, "ignoring unhandled payment event");
            WebhookResponse::outcome("ignored")
        }
    };

    Ok(Json(response))
}
