//! Stock commit service.
//!
//! Converts a session's reservation into a permanent stock decrement. The
//! order insert, every stock commit, the release of holds the order does not
//! cover, the bag clear and the session's move to `completed` run in one
//! multi-record transaction: either all of them are applied or none are.
//! Records are committed in `StockTarget` order so concurrent commits lock
//! rows in the same order.

use chrono::Utc;
use stock_store::{
    LineItem, Order, SessionId, StockStore, StockTransaction, StockUpdate, StoreError, UserId,
};

use crate::bulk::BulkWriter;
use crate::error::{CheckoutError, Result};
use crate::items::{merge_line_items, validate_items};

/// Commits reserved stock and records the order.
#[derive(Clone)]
pub struct StockCommitService<S> {
    store: S,
    writer: BulkWriter,
}

impl<S: StockStore> StockCommitService<S> {
    pub fn new(store: S, writer: BulkWriter) -> Self {
        Self { store, writer }
    }

    /// Commits the session's reservation on `items` and creates its order.
    ///
    /// Aborts without side effects when an order already exists for the
    /// session, when the session does not hold exactly the purchased amount
    /// on one of the records, or when the session is no longer active.
    #[tracing::instrument(skip_all, fields(session_id = %session_id, user_id = %user_id))]
    pub async fn commit(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        items: &[LineItem],
    ) -> Result<Order> {
        validate_items(items)?;
        let mut items = merge_line_items(items);
        items.sort_by_key(LineItem::target);
        let order = Order::new(session_id.clone(), user_id.clone(), items, Utc::now());

        let mut tx = self.store.begin().await?;
        if let Err(err) = self.write_all(&mut tx, &order).await {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback of aborted commit failed");
            }
            metrics::counter!("checkout_commit_aborts_total").increment(1);
            tracing::warn!(error = %err, "checkout commit aborted");
            return Err(err);
        }

        tx.commit()
            .await
            .map_err(|err| aborted(session_id, err.to_string()))?;

        metrics::counter!("checkout_commits_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            units = order.total_units(),
            "checkout committed"
        );
        Ok(order)
    }

    async fn write_all(&self, tx: &mut S::Transaction, order: &Order) -> Result<()> {
        let session_id = &order.session_id;

        // The order goes first so a repeated commit stops on its uniqueness
        // constraint before touching stock.
        match tx.insert_order(order).await {
            Ok(()) => {}
            Err(StoreError::DuplicateOrder(id)) => return Err(CheckoutError::AlreadyCommitted(id)),
            Err(err) => return Err(aborted(session_id, err.to_string())),
        }

        let updates: Vec<StockUpdate> = order
            .lines
            .iter()
            .map(|item| StockUpdate::commit(item.target(), session_id.clone(), item.quantity))
            .collect();
        let summary = self
            .writer
            .execute(&self.store, &updates, Some(tx))
            .await
            .map_err(|err| aborted(session_id, err.to_string()))?;

        if let Some(index) = summary.first_unmatched() {
            return Err(CheckoutError::ReservationMissing {
                session_id: session_id.clone(),
                target: order.lines[index].target(),
            });
        }

        let leftover = tx
            .release_session_holds(session_id)
            .await
            .map_err(|err| aborted(session_id, err.to_string()))?;
        if leftover > 0 {
            tracing::warn!(records = leftover, "released holds not covered by the order");
        }

        let cleared = tx
            .clear_bag(&order.user_id)
            .await
            .map_err(|err| aborted(session_id, err.to_string()))?;
        tracing::debug!(cleared, "bag cleared");

        let completed = tx
            .complete_session(session_id)
            .await
            .map_err(|err| aborted(session_id, err.to_string()))?;
        if !completed {
            return Err(CheckoutError::SessionNotActive(session_id.clone()));
        }

        Ok(())
    }
}

fn aborted(session_id: &SessionId, reason: String) -> CheckoutError {
    CheckoutError::TransactionAborted {
        session_id: session_id.clone(),
        reason,
    }
}
