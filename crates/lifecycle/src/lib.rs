//! Checkout lifecycle orchestration.
//!
//! Ties the checkout services to the payment gateway:
//! 1. [`CheckoutCoordinator::begin_checkout`] opens a gateway session, holds
//!    stock for it and registers the checkout session
//! 2. [`CheckoutCoordinator::confirm_payment`] commits the stock once the
//!    gateway confirms payment, at most once per session
//! 3. [`ExpiryReconciler`] releases stock held by sessions that were never
//!    paid, either from the periodic [`SweepScheduler`] or on demand

pub mod coordinator;
pub mod error;
pub mod reconciler;
pub mod reference;
pub mod scheduler;
pub mod services;

pub use coordinator::{CheckoutCoordinator, CheckoutStarted, ConfirmationOutcome};
pub use error::{GatewayError, LifecycleError, Result};
pub use reconciler::{ExpireOutcome, ExpiryReconciler, SessionExpiry, SweepReport};
pub use reference::SessionReference;
pub use scheduler::{SweepHandle, SweepScheduler};
pub use services::{GatewaySession, InMemoryPaymentGateway, PaymentGateway};
