//! Idempotency guard around the commit path.
//!
//! Payment confirmations are delivered at least once. The guard keys every
//! run on the payment session id and makes sure the guarded operation runs
//! to completion at most once per key:
//!
//! ```text
//! (absent) ──try_lock──► pending ──success──► completed
//!                          │
//!                          ├──failure──► (absent)
//!                          └──lock_expiry passes──► stale, may be re-locked
//! ```

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use stock_store::{IdempotencyStatus, IdempotencyStore, SessionId, StoreError};

/// Why a run was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// The key has already been processed.
    Completed,
    /// Another run holds a live lock on the key.
    InFlight,
}

impl DuplicateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateReason::Completed => "completed",
            DuplicateReason::InFlight => "in_flight",
        }
    }
}

impl std::fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a guarded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome<T> {
    Executed(T),
    Duplicate(DuplicateReason),
}

/// Runs an operation at most once per idempotency key.
#[derive(Clone)]
pub struct IdempotencyGuard<S> {
    store: S,
    lock_ttl: Duration,
}

impl<S: IdempotencyStore> IdempotencyGuard<S> {
    pub fn new(store: S, lock_ttl: Duration) -> Self {
        Self { store, lock_ttl }
    }

    /// Reports whether a key is already completed or locked by a live run.
    pub async fn check(
        &self,
        key: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<DuplicateReason>, StoreError> {
        Ok(self
            .store
            .get_key(key)
            .await?
            .filter(|record| record.is_effective(now))
            .map(|record| match record.status {
                IdempotencyStatus::Completed => DuplicateReason::Completed,
                IdempotencyStatus::Pending => DuplicateReason::InFlight,
            }))
    }

    /// Runs `op` unless the key is completed or locked.
    pub async fn run<T, E, F, Fut>(&self, key: &SessionId, op: F) -> Result<GuardOutcome<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError> + std::fmt::Display,
    {
        self.run_at(key, Utc::now(), op).await
    }

    /// Like [`run`](Self::run), evaluating lock expiry against `now`.
    #[tracing::instrument(skip(self, key, op), fields(key = %key))]
    pub async fn run_at<T, E, F, Fut>(
        &self,
        key: &SessionId,
        now: DateTime<Utc>,
        op: F,
    ) -> Result<GuardOutcome<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError> + std::fmt::Display,
    {
        if let Some(reason) = self.check(key, now).await? {
            return Ok(self.duplicate(reason));
        }

        // Two runs can both pass the check; only one of them wins the lock.
        if !self.store.try_lock(key, now, now + self.lock_ttl).await? {
            let reason = self
                .check(key, now)
                .await?
                .unwrap_or(DuplicateReason::InFlight);
            return Ok(self.duplicate(reason));
        }

        match op().await {
            Ok(value) => {
                if let Err(err) = self.store.mark_completed(key, Utc::now()).await {
                    tracing::error!(
                        error = %err,
                        "failed to mark idempotency key completed; the lock will lapse"
                    );
                }
                Ok(GuardOutcome::Executed(value))
            }
            Err(err) => {
                tracing::warn!(error = %err, "guarded operation failed; releasing lock");
                if let Err(release_err) = self.store.release_lock(key).await {
                    tracing::warn!(error = %release_err, "failed to release idempotency lock");
                }
                Err(err)
            }
        }
    }

    /// Marks a key completed outside a guarded run.
    pub async fn complete(&self, key: &SessionId) -> Result<(), StoreError> {
        self.store.mark_completed(key, Utc::now()).await
    }

    fn duplicate<T>(&self, reason: DuplicateReason) -> GuardOutcome<T> {
        metrics::counter!("checkout_duplicate_confirmations_total", "reason" => reason.as_str())
            .increment(1);
        tracing::info!(reason = %reason, "duplicate run skipped");
        GuardOutcome::Duplicate(reason)
    }
}
