//! Tunables of the checkout subsystem.

use chrono::Duration;

use crate::bulk::DEFAULT_BATCH_SIZE;

/// Checkout settings with sensible defaults.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// Maximum conditional updates per storage request.
    pub batch_size: usize,
    /// How long a checkout session holds stock before the sweep reclaims it.
    pub session_ttl: Duration,
    /// How long a pending idempotency lock blocks other commit attempts.
    /// Must comfortably exceed the commit transaction's duration.
    pub idempotency_lock_ttl: Duration,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            session_ttl: Duration::minutes(30),
            idempotency_lock_ttl: Duration::minutes(10),
        }
    }
}
