//! Stock reservation service.
//!
//! A reservation holds stock for one checkout session. It either holds every
//! requested line or none of them: when any conditional hold fails to match,
//! every hold the session made is released again before the error is
//! returned.

use chrono::{DateTime, Utc};
use stock_store::{LineItem, SessionId, StockStore, StockUpdate};

use crate::bulk::BulkWriter;
use crate::error::{CheckoutError, Result};
use crate::items::{merge_line_items, validate_items};

/// Whether [`reservation_updates`] builds holds or releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationDirection {
    Hold,
    Release,
}

/// Builds one conditional update per line item, in the order given.
///
/// Callers pass merged items so that each record receives a single update.
pub fn reservation_updates(
    items: &[LineItem],
    session_id: &SessionId,
    direction: ReservationDirection,
    now: DateTime<Utc>,
) -> Vec<StockUpdate> {
    items
        .iter()
        .map(|item| match direction {
            ReservationDirection::Hold => {
                StockUpdate::hold(item.target(), session_id.clone(), item.quantity, now)
            }
            ReservationDirection::Release => {
                StockUpdate::release(item.target(), session_id.clone())
            }
        })
        .collect()
}

/// Stock held for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationReceipt {
    pub session_id: SessionId,
    /// Merged line items, one per stock record.
    pub items: Vec<LineItem>,
    pub batch_count: usize,
}

impl ReservationReceipt {
    pub fn total_units(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

/// Result of releasing a session's holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// Records on which the session still held stock.
    pub released: u64,
    pub batch_count: usize,
}

/// Holds and releases stock on behalf of checkout sessions.
#[derive(Clone)]
pub struct ReservationService<S> {
    store: S,
    writer: BulkWriter,
}

impl<S: StockStore> ReservationService<S> {
    pub fn new(store: S, writer: BulkWriter) -> Self {
        Self { store, writer }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Holds every line item for the session, or nothing.
    ///
    /// Fails with [`CheckoutError::InsufficientStock`] naming the first line
    /// that could not be held. Stock is never decremented here.
    #[tracing::instrument(skip_all, fields(session_id = %session_id, lines = items.len()))]
    pub async fn reserve(
        &self,
        session_id: &SessionId,
        items: &[LineItem],
    ) -> Result<ReservationReceipt> {
        validate_items(items)?;
        let items = merge_line_items(items);
        let updates =
            reservation_updates(&items, session_id, ReservationDirection::Hold, Utc::now());

        let summary = match self.writer.execute(&self.store, &updates, None).await {
            Ok(summary) => summary,
            Err(err) => {
                self.roll_back(session_id, &items).await;
                return Err(err.into());
            }
        };

        if let Some(index) = summary.first_unmatched() {
            self.roll_back(session_id, &items).await;
            metrics::counter!("stock_reservations_rejected_total").increment(1);

            let item = &items[index];
            tracing::info!(
                stock = %item.target(),
                requested = item.quantity,
                "reservation rejected: insufficient stock"
            );
            return Err(CheckoutError::InsufficientStock {
                target: item.target(),
                requested: item.quantity,
            });
        }

        metrics::counter!("stock_reservations_total").increment(1);
        tracing::info!(records = items.len(), "stock reserved");

        Ok(ReservationReceipt {
            session_id: session_id.clone(),
            items,
            batch_count: summary.batch_count,
        })
    }

    /// Releases whatever the session holds on the given records.
    ///
    /// Quantities are ignored: a release drops the session's entries on each
    /// record, so repeating it is harmless.
    #[tracing::instrument(skip_all, fields(session_id = %session_id, lines = items.len()))]
    pub async fn release(
        &self,
        session_id: &SessionId,
        items: &[LineItem],
    ) -> Result<ReleaseSummary> {
        let items = merge_line_items(items);
        let updates = reservation_updates(
            &items,
            session_id,
            ReservationDirection::Release,
            Utc::now(),
        );
        let summary = self.writer.execute(&self.store, &updates, None).await?;

        tracing::debug!(released = summary.matched, "stock released");
        Ok(ReleaseSummary {
            released: summary.matched,
            batch_count: summary.batch_count,
        })
    }

    async fn roll_back(&self, session_id: &SessionId, items: &[LineItem]) {
        if let Err(err) = self.release(session_id, items).await {
            metrics::counter!("stock_rollback_failures_total").increment(1);
            tracing::error!(
                session_id = %session_id,
                error = %err,
                "failed to roll back partial reservation; the sweep will release it"
            );
        }
    }
}
