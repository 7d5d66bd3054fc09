//! Orders materialized from committed checkout sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stock::LineItem;
use crate::{OrderId, SessionId, UserId};

/// An order created exactly once per committed session.
///
/// `session_id` is unique across all orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub lines: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        lines: Vec<LineItem>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::for_session(&session_id),
            session_id,
            user_id,
            lines,
            created_at,
        }
    }

    /// Total units across all lines.
    pub fn total_units(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}
