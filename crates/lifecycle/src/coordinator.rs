//! Checkout coordinator for initiation and payment confirmation.

use chrono::{DateTime, Utc};
use checkout::{
    BulkWriter, CheckoutError, CheckoutSettings, DuplicateReason, GuardOutcome, IdempotencyGuard,
    ReservationService, SessionRegistry, StockCommitService, merge_line_items, validate_items,
};
use common::{SessionId, UserId};
use stock_store::{CheckoutSession, CheckoutStore, LineItem, Order, SessionStatus};

use crate::error::{LifecycleError, Result};
use crate::services::PaymentGateway;

/// A checkout that is holding stock and waiting for payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutStarted {
    pub session_id: SessionId,
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub items: Vec<LineItem>,
}

/// Result of handling a payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// This confirmation committed the stock and created the order.
    Committed(Order),
    /// The confirmation was already handled or is being handled.
    Duplicate(DuplicateReason),
}

/// Drives a checkout from initiation to payment confirmation.
///
/// Initiation opens the gateway session, holds the stock under its id and
/// registers the checkout session, undoing earlier steps when a later one
/// fails. Confirmation runs the stock commit behind the idempotency guard.
pub struct CheckoutCoordinator<S, G>
where
    S: CheckoutStore,
    G: PaymentGateway,
{
    reservations: ReservationService<S>,
    sessions: SessionRegistry<S>,
    commits: StockCommitService<S>,
    guard: IdempotencyGuard<S>,
    gateway: G,
    settings: CheckoutSettings,
}

impl<S, G> CheckoutCoordinator<S, G>
where
    S: CheckoutStore,
    G: PaymentGateway,
{
    /// Creates a new coordinator.
    pub fn new(store: S, gateway: G, settings: CheckoutSettings) -> Self {
        let writer = BulkWriter::new(settings.batch_size);
        Self {
            reservations: ReservationService::new(store.clone(), writer),
            sessions: SessionRegistry::new(store.clone()),
            commits: StockCommitService::new(store.clone(), writer),
            guard: IdempotencyGuard::new(store, settings.idempotency_lock_ttl),
            gateway,
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry<S> {
        &self.sessions
    }

    pub fn reservations(&self) -> &ReservationService<S> {
        &self.reservations
    }

    pub fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    /// Starts a checkout for `items`.
    ///
    /// Fails with [`CheckoutError::InsufficientStock`] when the stock cannot
    /// all be held; nothing is held and the gateway session is expired.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn begin_checkout(
        &self,
        user_id: &UserId,
        items: &[LineItem],
    ) -> Result<CheckoutStarted> {
        validate_items(items)?;
        let items = merge_line_items(items);
        let expires_at = Utc::now() + self.settings.session_ttl;

        let gateway_session = self
            .gateway
            .create_session(user_id, &items, expires_at)
            .await?;
        let session_id = gateway_session.session_id;

        if self.sessions.get(&session_id).await?.is_some() {
            return Err(CheckoutError::DuplicateSession(session_id).into());
        }

        if let Err(err) = self.reservations.reserve(&session_id, &items).await {
            self.expire_gateway_session(&session_id).await;
            return Err(err.into());
        }

        if let Err(err) = self
            .sessions
            .create(session_id.clone(), user_id.clone(), expires_at)
            .await
        {
            tracing::error!(session_id = %session_id, error = %err, "failed to register checkout session");
            if let Err(release_err) = self.reservations.release(&session_id, &items).await {
                metrics::counter!("stock_rollback_failures_total").increment(1);
                tracing::error!(
                    session_id = %session_id,
                    error = %release_err,
                    "failed to release stock of unregistered session"
                );
            }
            self.expire_gateway_session(&session_id).await;
            return Err(err.into());
        }

        tracing::info!(session_id = %session_id, "checkout started");
        Ok(CheckoutStarted {
            session_id,
            url: gateway_session.url,
            expires_at,
            items,
        })
    }

    /// Commits the checkout once the gateway confirms payment.
    ///
    /// Safe to call any number of times for the same session: only the
    /// first successful call commits, later calls report a duplicate.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(&self, session_id: &SessionId) -> Result<ConfirmationOutcome> {
        let outcome = self
            .guard
            .run(session_id, || self.commit_session(session_id))
            .await;

        match outcome {
            Ok(GuardOutcome::Executed(order)) => Ok(ConfirmationOutcome::Committed(order)),
            Ok(GuardOutcome::Duplicate(reason)) => Ok(ConfirmationOutcome::Duplicate(reason)),
            Err(err) if err.is_already_committed() => {
                if let Err(mark_err) = self.guard.complete(session_id).await {
                    tracing::warn!(error = %mark_err, "failed to mark committed session completed");
                }
                metrics::counter!(
                    "checkout_duplicate_confirmations_total",
                    "reason" => DuplicateReason::Completed.as_str()
                )
                .increment(1);
                Ok(ConfirmationOutcome::Duplicate(DuplicateReason::Completed))
            }
            Err(err) => Err(err),
        }
    }

    async fn commit_session(&self, session_id: &SessionId) -> Result<Order> {
        let session = self.load_session(session_id).await?;
        match session.status {
            SessionStatus::Active => {}
            SessionStatus::Completed => {
                return Err(CheckoutError::AlreadyCommitted(session_id.clone()).into());
            }
            SessionStatus::Expired | SessionStatus::Failed => {
                return Err(CheckoutError::SessionNotActive(session_id.clone()).into());
            }
        }

        let items = self.gateway.line_items(session_id).await?;
        let order = self
            .commits
            .commit(session_id, &session.user_id, &items)
            .await?;
        Ok(order)
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<CheckoutSession> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| LifecycleError::from(CheckoutError::SessionNotFound(session_id.clone())))
    }

    async fn expire_gateway_session(&self, session_id: &SessionId) {
        if let Err(err) = self.gateway.expire_session(session_id).await {
            tracing::warn!(session_id = %session_id, error = %err, "failed to expire gateway session");
        }
    }
}
