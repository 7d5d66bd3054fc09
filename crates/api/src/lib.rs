//! HTTP API server with observability for the checkout subsystem.
//!
//! Provides endpoints for checkout initiation, payment webhooks, stock and
//! session diagnostics and administrative expiry, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::BulkWriter;
use lifecycle::{CheckoutCoordinator, ExpiryReconciler, InMemoryPaymentGateway, PaymentGateway};
use metrics_exporter_prometheus::PrometheusHandle;
use stock_store::CheckoutStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, G>(state: Arc<AppState<S, G>>, metrics_handle: PrometheusHandle) -> Router
where
    S: CheckoutStore,
    G: PaymentGateway + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::create::<S, G>))
        .route(
            "/checkout-sessions/{id}",
            get(routes::checkout::get_session::<S, G>),
        )
        .route("/products/{id}/stock", get(routes::stock::get::<S, G>))
        .route("/webhooks/payment", post(routes::webhooks::handle::<S, G>))
        .route(
            "/admin/checkout-sessions/expire",
            post(routes::admin::expire_session::<S, G>),
        )
        .route("/admin/sweep", post(routes::admin::sweep::<S, G>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over a store and a payment gateway.
pub fn create_state<S, G>(store: S, gateway: G, config: &Config) -> Arc<AppState<S, G>>
where
    S: CheckoutStore,
    G: PaymentGateway + Clone + 'static,
{
    let settings = config.checkout_settings();
    let writer = BulkWriter::new(settings.batch_size);

    let reconciler = ExpiryReconciler::new(store.clone(), gateway.clone(), writer)
        .with_concurrency(config.sweep_concurrency);
    let coordinator = CheckoutCoordinator::new(store.clone(), gateway, settings);

    Arc::new(AppState {
        store,
        coordinator,
        reconciler: Arc::new(reconciler),
    })
}

/// Creates the default application state with the in-memory payment gateway.
pub fn create_default_state<S: CheckoutStore>(
    store: S,
) -> Arc<AppState<S, InMemoryPaymentGateway>> {
    create_state(store, InMemoryPaymentGateway::new(), &Config::default())
}
