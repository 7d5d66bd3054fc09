//! Checkout session registry.

use chrono::{DateTime, Utc};
use stock_store::{CheckoutSession, SessionId, SessionStatus, SessionStore, StoreError, UserId};

use crate::error::{CheckoutError, Result};

/// Outcome of a requested status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The session was active and now has the requested status.
    Transitioned(CheckoutSession),
    /// The session had already reached this terminal status.
    AlreadyTerminal(SessionStatus),
}

/// Tracks checkout sessions and their one-way lifecycle.
///
/// A session starts `active` and moves to exactly one of `completed`,
/// `expired` or `failed`. The move is a conditional write on `active`, so
/// when two paths race only one of them transitions the session.
#[derive(Clone)]
pub struct SessionRegistry<S> {
    store: S,
}

impl<S: SessionStore> SessionRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Registers a new active session.
    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        session_id: SessionId,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<CheckoutSession> {
        let session = CheckoutSession::new(session_id, user_id, Utc::now(), expires_at);
        match self.store.insert_session(&session).await {
            Ok(()) => Ok(session),
            Err(StoreError::DuplicateSession(id)) => Err(CheckoutError::DuplicateSession(id)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get(&self, session_id: &SessionId) -> Result<Option<CheckoutSession>> {
        Ok(self.store.get_session(session_id).await?)
    }

    /// Moves an active session to a terminal status.
    #[tracing::instrument(skip(self))]
    pub async fn transition(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> Result<TransitionOutcome> {
        if !status.is_terminal() {
            return Err(CheckoutError::InvalidTransition {
                session_id: session_id.clone(),
                to: status,
            });
        }

        if let Some(session) = self.store.transition_session(session_id, status).await? {
            tracing::info!(status = %status, "checkout session transitioned");
            return Ok(TransitionOutcome::Transitioned(session));
        }

        match self.store.get_session(session_id).await? {
            Some(session) => Ok(TransitionOutcome::AlreadyTerminal(session.status)),
            None => Err(CheckoutError::SessionNotFound(session_id.clone())),
        }
    }

    /// Active sessions whose expiry is before `now`.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<CheckoutSession>> {
        Ok(self.store.list_expired_sessions(now).await?)
    }

    /// Sessions that ended unpaid and still hold stock.
    pub async fn list_unreleased(&self) -> Result<Vec<CheckoutSession>> {
        Ok(self.store.list_unreleased_sessions().await?)
    }

    pub async fn mark_stock_released(&self, session_id: &SessionId) -> Result<()> {
        Ok(self.store.mark_stock_released(session_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use stock_store::InMemoryStore;

    use super::*;

    fn registry() -> SessionRegistry<InMemoryStore> {
        SessionRegistry::new(InMemoryStore::new())
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let registry = registry();
        let expires = Utc::now() + Duration::minutes(30);
        registry
            .create("cs_test_dup".into(), "user-1".into(), expires)
            .await
            .unwrap();

        let err = registry
            .create("cs_test_dup".into(), "user-2".into(), expires)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::DuplicateSession(_)));
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let registry = registry();
        let id = SessionId::new("cs_test_final");
        registry
            .create(id.clone(), "user-1".into(), Utc::now() + Duration::minutes(30))
            .await
            .unwrap();

        let first = registry.transition(&id, SessionStatus::Expired).await.unwrap();
        assert!(matches!(first, TransitionOutcome::Transitioned(ref s) if s.status == SessionStatus::Expired));

        let second = registry.transition(&id, SessionStatus::Completed).await.unwrap();
        assert_eq!(second, TransitionOutcome::AlreadyTerminal(SessionStatus::Expired));
        assert_eq!(
            registry.get(&id).await.unwrap().unwrap().status,
            SessionStatus::Expired
        );
    }

    #[tokio::test]
    async fn transition_to_active_is_refused() {
        let registry = registry();
        let err = registry
            .transition(&SessionId::new("cs_test_any"), SessionStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let err = registry()
            .transition(&SessionId::new("cs_test_missing"), SessionStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn list_expired_skips_live_and_terminal_sessions() {
        let registry = registry();
        let now = Utc::now();
        registry
            .create("cs_test_old".into(), "u".into(), now - Duration::minutes(1))
            .await
            .unwrap();
        registry
            .create("cs_test_live".into(), "u".into(), now + Duration::minutes(10))
            .await
            .unwrap();
        registry
            .create("cs_test_done".into(), "u".into(), now - Duration::minutes(5))
            .await
            .unwrap();
        registry
            .transition(&"cs_test_done".into(), SessionStatus::Completed)
            .await
            .unwrap();

        let expired = registry.list_expired(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].session_id, SessionId::new("cs_test_old"));
    }
}
