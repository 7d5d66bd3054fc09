//! Checkout session records and their status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SessionId, UserId};

/// Lifecycle status of a checkout session.
///
/// State transitions:
/// ```text
/// Active ──┬──► Completed
///          ├──► Expired
///          └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Payment is pending; stock is held.
    #[default]
    Active,

    /// Payment confirmed and stock committed (terminal state).
    Completed,

    /// Abandoned or timed out; stock released (terminal state).
    Expired,

    /// Payment attempt failed (terminal state).
    Failed,
}

impl SessionStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    /// Returns true if a session in this state may move to `next`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(self, SessionStatus::Active) && next.is_terminal()
    }

    /// Returns the state name as stored and displayed.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
            SessionStatus::Failed => "failed",
        }
    }

    /// Parses a stored state name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            "expired" => Some(SessionStatus::Expired),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One payment attempt and the window during which it holds stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set once the session's holds are gone: committed, or released after
    /// the session ended unpaid.
    #[serde(default)]
    pub stock_released: bool,
}

impl CheckoutSession {
    /// Creates an active session.
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            user_id,
            status: SessionStatus::Active,
            created_at,
            expires_at,
            stock_released: false,
        }
    }

    /// Returns true if the session is still active past its expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && self.expires_at < now
    }

    /// Returns true if the session ended unpaid and its stock is still held.
    pub fn needs_stock_release(&self) -> bool {
        matches!(self.status, SessionStatus::Expired | SessionStatus::Failed)
            && !self.stock_released
    }
}
