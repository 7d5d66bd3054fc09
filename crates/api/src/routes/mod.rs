//! HTTP route handlers.

pub mod admin;
pub mod checkout;
pub mod health;
pub mod metrics;
pub mod stock;
pub mod webhooks;

use std::sync::Arc;

use lifecycle::{CheckoutCoordinator, ExpiryReconciler, PaymentGateway};
use stock_store::CheckoutStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S, G>
where
    S: CheckoutStore,
    G: PaymentGateway + 'static,
{
    pub store: S,
    pub coordinator: CheckoutCoordinator<S, G>,
    pub reconciler: Arc<ExpiryReconciler<S, G>>,
}
