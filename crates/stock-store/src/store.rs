use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    BatchOutcome, CheckoutSession, IdempotencyRecord, LineItem, Order, Product, ProductId,
    Result, SessionId, SessionStatus, StockUpdate, UserId,
};

/// Storage of stock records.
///
/// Stock is never written through read-modify-write: every change is a
/// [`StockUpdate`] whose match condition is evaluated atomically against a
/// single record by the backend.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Multi-record transaction handle produced by [`StockStore::begin`].
    type Transaction: StockTransaction;

    /// Loads the stock view of a product.
    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>>;

    /// Replaces the stock view of a product.
    ///
    /// Stands in for the catalog, which owns product creation.
    async fn save_product(&self, product: Product) -> Result<()>;

    /// Submits one batch of conditional updates as a single storage request.
    ///
    /// Each update is atomic on its own record; no ordering or atomicity is
    /// guaranteed across records.
    async fn apply_batch(&self, updates: &[StockUpdate]) -> Result<BatchOutcome>;

    /// Starts a multi-record transaction.
    async fn begin(&self) -> Result<Self::Transaction>;
}

/// An open multi-record transaction.
///
/// Nothing written through the transaction is visible until [`commit`]
/// succeeds; dropping or rolling back discards every write.
///
/// [`commit`]: StockTransaction::commit
#[async_trait]
pub trait StockTransaction: Send {
    /// Submits one batch of conditional updates inside the transaction.
    async fn apply_batch(&mut self, updates: &[StockUpdate]) -> Result<BatchOutcome>;

    /// Inserts an order. Fails with `DuplicateOrder` if one exists for the session.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Removes every pending bag item of the buyer. Returns the number removed.
    async fn clear_bag(&mut self, user_id: &UserId) -> Result<u64>;

    /// Removes every hold the session still has on any record and returns
    /// the number of records released.
    async fn release_session_holds(&mut self, session_id: &SessionId) -> Result<u64>;

    /// Moves an active session to `completed` and marks its stock released.
    /// Returns false if it was not active.
    async fn complete_session(&mut self, session_id: &SessionId) -> Result<bool>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Storage of checkout sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new session. Fails with `DuplicateSession` if the id is taken.
    async fn insert_session(&self, session: &CheckoutSession) -> Result<()>;

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<CheckoutSession>>;

    /// Moves an active session to `status`.
    ///
    /// Returns the updated session, or `None` if the session was missing or
    /// no longer active.
    async fn transition_session(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> Result<Option<CheckoutSession>>;

    /// Lists active sessions whose `expires_at` is before `now`.
    async fn list_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<CheckoutSession>>;

    /// Lists sessions that ended unpaid while still holding stock.
    async fn list_unreleased_sessions(&self) -> Result<Vec<CheckoutSession>>;

    /// Records that the session no longer holds stock.
    async fn mark_stock_released(&self, session_id: &SessionId) -> Result<()>;
}

/// Storage of idempotency keys.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get_key(&self, key: &SessionId) -> Result<Option<IdempotencyRecord>>;

    /// Atomically creates a pending lock unless a completed record or a live
    /// pending lock exists. Returns true if the lock was acquired.
    async fn try_lock(
        &self,
        key: &SessionId,
        now: DateTime<Utc>,
        lock_expiry: DateTime<Utc>,
    ) -> Result<bool>;

    /// Marks the key completed.
    async fn mark_completed(&self, key: &SessionId, processed_at: DateTime<Utc>) -> Result<()>;

    /// Drops a pending lock so a retry need not wait for it to lapse.
    /// Completed records are left untouched.
    async fn release_lock(&self, key: &SessionId) -> Result<()>;
}

/// Read access to committed orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order_by_session(&self, session_id: &SessionId) -> Result<Option<Order>>;

    async fn count_orders_for_session(&self, session_id: &SessionId) -> Result<u64>;
}

/// The buyer's pending bag. Owned by the cart; the commit path only clears it.
#[async_trait]
pub trait BagStore: Send + Sync {
    async fn add_to_bag(&self, user_id: &UserId, item: LineItem) -> Result<()>;

    async fn get_bag(&self, user_id: &UserId) -> Result<Vec<LineItem>>;
}

/// Everything the checkout subsystem needs from storage.
pub trait CheckoutStore:
    StockStore + SessionStore + IdempotencyStore + OrderStore + BagStore + Clone + 'static
{
}

impl<T> CheckoutStore for T where
    T: StockStore + SessionStore + IdempotencyStore + OrderStore + BagStore + Clone + 'static
{
}
