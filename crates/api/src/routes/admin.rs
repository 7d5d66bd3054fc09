//! Administrative endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use lifecycle::{ExpireOutcome, PaymentGateway, SweepReport};
use serde::Deserialize;
use stock_store::CheckoutStore;

use super::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ExpireRequest {
    /// A checkout session id or a checkout URL containing one.
    pub reference: String,
}

/// POST /admin/checkout-sessions/expire — expire one session by reference.
#[tracing::instrument(skip(state, req))]
pub async fn expire_session<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Json(req): Json<ExpireRequest>,
) -> Result<Json<ExpireOutcome>, ApiError>
where
    S: CheckoutStore,
    G: PaymentGateway + 'static,
{
    let outcome = state.reconciler.expire_one(&req.reference).await?;
    tracing::info!(success = outcome.success, message = %outcome.message, "admin expire");
    Ok(Json(outcome))
}

/// POST /admin/sweep — run one expiry sweep now.
#[tracing::instrument(skip(state))]
pub async fn sweep<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
) -> Result<Json<SweepReport>, ApiError>
where
    S: CheckoutStore,
    G: PaymentGateway + 'static,
{
    let report = state.reconciler.sweep(Utc::now()).await?;
    Ok(Json(report))
}
