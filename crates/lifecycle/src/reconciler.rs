//! Expiry reconciler.
//!
//! Reclaims stock held by checkout sessions that were never paid. A session
//! is first moved to `expired`; only the call that wins that transition
//! releases the stock, using the gateway's line-item metadata. Session
//! termination always proceeds: when the metadata cannot be fetched or the
//! release fails, the cleanup is deferred. The session keeps its
//! `stock_released` flag unset and every later sweep retries the release
//! until it succeeds.

use std::time::Instant;

use chrono::{DateTime, Utc};
use checkout::{BulkWriter, CheckoutError, ReservationService, SessionRegistry, TransitionOutcome};
use common::SessionId;
use futures_util::{StreamExt, stream};
use serde::Serialize;
use stock_store::{CheckoutStore, SessionStatus};

use crate::error::{LifecycleError, Result};
use crate::reference::SessionReference;
use crate::services::PaymentGateway;

/// Default number of sessions expired concurrently by one sweep.
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 8;

/// Tally of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired-but-active sessions found.
    pub scanned: usize,
    /// Sessions this sweep moved to `expired`.
    pub expired: usize,
    /// Sessions another path had already closed.
    pub already_terminal: usize,
    /// Stock records on which a hold was released.
    pub items_released: u64,
    /// Sessions whose stock could not be released, in this sweep or a retry.
    pub cleanup_deferred: usize,
    /// Sessions from earlier deferred cleanups whose stock is now released.
    pub cleanup_recovered: usize,
    /// Sessions that could not be processed at all.
    pub failed: usize,
}

/// What happened to a session asked to expire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExpiry {
    Expired {
        items_released: u64,
        cleanup_deferred: bool,
    },
    AlreadyTerminal(SessionStatus),
}

/// Answer to an administrative expire request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpireOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// Expires abandoned checkout sessions and releases their stock.
pub struct ExpiryReconciler<S, G>
where
    S: CheckoutStore,
    G: PaymentGateway,
{
    reservations: ReservationService<S>,
    sessions: SessionRegistry<S>,
    gateway: G,
    concurrency: usize,
}

impl<S, G> ExpiryReconciler<S, G>
where
    S: CheckoutStore,
    G: PaymentGateway,
{
    /// Creates a new reconciler.
    pub fn new(store: S, gateway: G, writer: BulkWriter) -> Self {
        Self {
            reservations: ReservationService::new(store.clone(), writer),
            sessions: SessionRegistry::new(store),
            gateway,
            concurrency: DEFAULT_SWEEP_CONCURRENCY,
        }
    }

    /// Sets how many sessions a sweep expires at once. Zero is treated as 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Retries deferred stock releases, then expires every active session
    /// whose expiry is before `now`.
    ///
    /// Idempotent: a second sweep over the same sessions finds nothing to do.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let started = Instant::now();
        let mut report = SweepReport::default();

        let unreleased = self.sessions.list_unreleased().await?;
        let retries: Vec<_> = stream::iter(unreleased)
            .map(|session| async move {
                let result = self.release_stock(&session.session_id).await;
                (session.session_id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (session_id, result) in retries {
            match result {
                Ok(items_released) => {
                    metrics::counter!("sweep_cleanup_recovered_total").increment(1);
                    tracing::info!(session_id = %session_id, items_released, "deferred cleanup completed");
                    report.cleanup_recovered += 1;
                    report.items_released += items_released;
                }
                Err(err) => {
                    tracing::warn!(session_id = %session_id, error = %err, "deferred cleanup still failing");
                    report.cleanup_deferred += 1;
                }
            }
        }

        let candidates = self.sessions.list_expired(now).await?;
        report.scanned = candidates.len();

        let results: Vec<_> = stream::iter(candidates)
            .map(|session| async move {
                let result = self.expire_session(&session.session_id).await;
                (session.session_id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (session_id, result) in results {
            match result {
                Ok(SessionExpiry::Expired {
                    items_released,
                    cleanup_deferred,
                }) => {
                    report.expired += 1;
                    report.items_released += items_released;
                    if cleanup_deferred {
                        report.cleanup_deferred += 1;
                    }
                }
                Ok(SessionExpiry::AlreadyTerminal(_)) => report.already_terminal += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(session_id = %session_id, error = %err, "failed to expire session");
                }
            }
        }

        metrics::histogram!("sweep_duration_seconds").record(started.elapsed().as_secs_f64());
        if report.scanned > 0 || report.cleanup_recovered > 0 || report.cleanup_deferred > 0 {
            tracing::info!(
                scanned = report.scanned,
                expired = report.expired,
                items_released = report.items_released,
                cleanup_deferred = report.cleanup_deferred,
                cleanup_recovered = report.cleanup_recovered,
                "sweep finished"
            );
        }
        Ok(report)
    }

    /// Expires one session and releases its stock.
    ///
    /// A session that is already terminal is left alone and its status is
    /// reported back.
    #[tracing::instrument(skip(self))]
    pub async fn expire_session(&self, session_id: &SessionId) -> Result<SessionExpiry> {
        match self
            .sessions
            .transition(session_id, SessionStatus::Expired)
            .await?
        {
            TransitionOutcome::Transitioned(_) => {}
            TransitionOutcome::AlreadyTerminal(status) => {
                tracing::debug!(status = %status, "session already terminal");
                return Ok(SessionExpiry::AlreadyTerminal(status));
            }
        }
        metrics::counter!("checkout_sessions_expired_total").increment(1);

        let expiry = match self.release_stock(session_id).await {
            Ok(items_released) => SessionExpiry::Expired {
                items_released,
                cleanup_deferred: false,
            },
            Err(err) => {
                metrics::counter!("sweep_cleanup_deferred_total").increment(1);
                tracing::warn!(
                    error = %err,
                    "session expired but its stock could not be released; cleanup deferred"
                );
                SessionExpiry::Expired {
                    items_released: 0,
                    cleanup_deferred: true,
                }
            }
        };

        tracing::info!("checkout session expired");
        Ok(expiry)
    }

    /// Releases the holds of an ended session using the gateway's metadata
    /// and records that its stock is released.
    async fn release_stock(&self, session_id: &SessionId) -> Result<u64> {
        let items = self.gateway.line_items(session_id).await?;
        let summary = self.reservations.release(session_id, &items).await?;
        self.sessions.mark_stock_released(session_id).await?;
        Ok(summary.released)
    }

    /// Administrative expiry by session id or checkout URL.
    ///
    /// Malformed references fail before storage is touched. The gateway
    /// session is expired as well so the buyer can no longer pay.
    #[tracing::instrument(skip(self))]
    pub async fn expire_one(&self, reference: &str) -> Result<ExpireOutcome> {
        let session_id = SessionReference::parse(reference)?.into_session_id();

        match self.expire_session(&session_id).await {
            Ok(SessionExpiry::Expired {
                items_released,
                cleanup_deferred,
            }) => {
                if let Err(err) = self.gateway.expire_session(&session_id).await {
                    tracing::warn!(error = %err, "failed to expire gateway session");
                }
                let message = if cleanup_deferred {
                    format!("Session {session_id} expired; stock release deferred")
                } else {
                    format!("Session {session_id} expired; released {items_released} stock record(s)")
                };
                Ok(ExpireOutcome {
                    success: true,
                    message,
                    session_id: Some(session_id),
                })
            }
            Ok(SessionExpiry::AlreadyTerminal(status)) => Ok(ExpireOutcome {
                success: false,
                message: format!("already {status}"),
                session_id: Some(session_id),
            }),
            Err(LifecycleError::Checkout(CheckoutError::SessionNotFound(_))) => Ok(ExpireOutcome {
                success: false,
                message: format!("Checkout session not found: {session_id}"),
                session_id: Some(session_id),
            }),
            Err(err) => Err(err),
        }
    }
}
