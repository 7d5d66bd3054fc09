//! Stock diagnostics endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::{ProductId, SessionId};
use lifecycle::PaymentGateway;
use serde::Serialize;
use stock_store::{CheckoutStore, Product, StockRecord};

use super::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct StockResponse {
    pub product_id: ProductId,
    pub quantity: u32,
    pub reserved: u32,
    pub records: Vec<StockRecordResponse>,
}

#[derive(Serialize)]
pub struct StockRecordResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub quantity: u32,
    pub reserved: u32,
    pub available: u32,
    pub in_stock: bool,
    pub reservations: Vec<ReservationResponse>,
}

#[derive(Serialize)]
pub struct ReservationResponse {
    pub session_id: SessionId,
    pub quantity: u32,
    pub reserved_at: DateTime<Utc>,
}

impl StockRecordResponse {
    fn new(variant: Option<&str>, record: &StockRecord) -> Self {
        Self {
            variant: variant.map(str::to_string),
            quantity: record.quantity,
            reserved: record.reserved,
            available: record.available(),
            in_stock: record.in_stock,
            reservations: record
                .reservations
                .iter()
                .map(|entry| ReservationResponse {
                    session_id: entry.session_id.clone(),
                    quantity: entry.quantity,
                    reserved_at: entry.reserved_at,
                })
                .collect(),
        }
    }
}

impl From<&Product> for StockResponse {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.id.clone(),
            quantity: product.aggregate_quantity(),
            reserved: product.aggregate_reserved(),
            records: product
                .stock
                .records()
                .map(|(variant, record)| StockRecordResponse::new(variant, record))
                .collect(),
        }
    }
}

/// GET /products/{id}/stock — current stock record(s) of a product.
#[tracing::instrument(skip(state))]
pub async fn get<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<Json<StockResponse>, ApiError>
where
    S: CheckoutStore,
    G: PaymentGateway + 'static,
{
    let product_id = ProductId::new(id);
    let product = state
        .store
        .get_product(&product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product not found: {product_id}")))?;

    Ok(Json(StockResponse::from(&product)))
}
