//! Idempotency keys guarding the commit path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::Pending => "pending",
            IdempotencyStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(IdempotencyStatus::Pending),
            "completed" => Some(IdempotencyStatus::Completed),
            _ => None,
        }
    }
}

/// Lock and completion marker for one external payment session.
///
/// A pending record past its `lock_expiry` counts as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: SessionId,
    pub status: IdempotencyStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub lock_expiry: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Creates a pending lock that lapses at `lock_expiry`.
    pub fn pending(key: SessionId, lock_expiry: DateTime<Utc>) -> Self {
        Self {
            key,
            status: IdempotencyStatus::Pending,
            processed_at: None,
            lock_expiry,
        }
    }

    /// Returns true if the record still blocks a new attempt at `now`.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            IdempotencyStatus::Completed => true,
            IdempotencyStatus::Pending => self.lock_expiry > now,
        }
    }
}
