//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SessionId, UserId};
use stock_store::LineItem;
use uuid::Uuid;

use crate::error::GatewayError;

/// A payment session opened at the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySession {
    /// External reference; doubles as the checkout session id.
    pub session_id: SessionId,
    /// Where the buyer completes payment.
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Trait for the payment gateway operations the checkout depends on.
///
/// The line items a session was opened with are kept by the gateway as
/// metadata and are authoritative for commit and release.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment session carrying `items` as metadata.
    async fn create_session(
        &self,
        user_id: &UserId,
        items: &[LineItem],
        expires_at: DateTime<Utc>,
    ) -> Result<GatewaySession, GatewayError>;

    /// Returns the line-item metadata of a session.
    async fn line_items(&self, session_id: &SessionId) -> Result<Vec<LineItem>, GatewayError>;

    /// Expires a session so it can no longer be paid.
    async fn expire_session(&self, session_id: &SessionId) -> Result<(), GatewayError>;
}

#[derive(Debug)]
struct GatewayRecord {
    items: Vec<LineItem>,
    expired: bool,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    sessions: HashMap<SessionId, GatewayRecord>,
    fail_on_create: bool,
    fail_on_line_items: bool,
    fail_on_expire: bool,
}

/// In-memory payment gateway for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryGatewayState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryGatewayState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the gateway to refuse new sessions.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.write().fail_on_create = fail;
    }

    /// Configures metadata lookups to fail as if the gateway were down.
    pub fn set_fail_on_line_items(&self, fail: bool) {
        self.write().fail_on_line_items = fail;
    }

    /// Configures session expiry calls to fail.
    pub fn set_fail_on_expire(&self, fail: bool) {
        self.write().fail_on_expire = fail;
    }

    /// Registers a session opened outside this process.
    pub fn insert_session(&self, session_id: SessionId, items: Vec<LineItem>) {
        self.write().sessions.insert(
            session_id,
            GatewayRecord {
                items,
                expired: false,
            },
        );
    }

    /// Returns the number of sessions the gateway knows.
    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    /// Returns true if the session exists and has been expired.
    pub fn is_expired(&self, session_id: &SessionId) -> bool {
        self.read()
            .sessions
            .get(session_id)
            .is_some_and(|record| record.expired)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_session(
        &self,
        _user_id: &UserId,
        items: &[LineItem],
        expires_at: DateTime<Utc>,
    ) -> Result<GatewaySession, GatewayError> {
        let mut state = self.write();

        if state.fail_on_create {
            return Err(GatewayError::Rejected("session creation declined".to_string()));
        }

        let session_id = SessionId::new(format!("cs_test_{}", Uuid::new_v4().simple()));
        state.sessions.insert(
            session_id.clone(),
            GatewayRecord {
                items: items.to_vec(),
                expired: false,
            },
        );

        Ok(GatewaySession {
            url: format!("https://checkout.example.com/c/pay/{session_id}"),
            session_id,
            expires_at,
        })
    }

    async fn line_items(&self, session_id: &SessionId) -> Result<Vec<LineItem>, GatewayError> {
        let state = self.read();

        if state.fail_on_line_items {
            return Err(GatewayError::Unavailable("metadata lookup timed out".to_string()));
        }

        state
            .sessions
            .get(session_id)
            .map(|record| record.items.clone())
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.clone()))
    }

    async fn expire_session(&self, session_id: &SessionId) -> Result<(), GatewayError> {
        let mut state = self.write();

        if state.fail_on_expire {
            return Err(GatewayError::Unavailable("expire call timed out".to_string()));
        }

        match state.sessions.get_mut(session_id) {
            Some(record) => {
                record.expired = true;
                Ok(())
            }
            None => Err(GatewayError::SessionNotFound(session_id.clone())),
        }
    }
}
