use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::store::{
    BagStore, IdempotencyStore, OrderStore, SessionStore, StockStore, StockTransaction,
};
use crate::{
    BatchOutcome, CheckoutSession, IdempotencyRecord, IdempotencyStatus, LineItem, Order,
    Product, ProductId, Result, SessionId, SessionStatus, StockUpdate, StoreError, UserId,
};

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    sessions: HashMap<SessionId, CheckoutSession>,
    idempotency: HashMap<SessionId, IdempotencyRecord>,
    /// Keyed by session: one order per session.
    orders: HashMap<SessionId, Order>,
    bags: HashMap<UserId, Vec<LineItem>>,
}

impl MemoryState {
    fn apply_updates(
        products: &mut HashMap<ProductId, Product>,
        updates: &[StockUpdate],
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for update in updates {
            let matched = products
                .get_mut(&update.target.product_id)
                .is_some_and(|product| product.apply(update));
            outcome.record(matched);
        }
        outcome
    }
}

#[derive(Debug, Default)]
struct Faults {
    batch_calls: AtomicUsize,
    fail_on_batch: AtomicUsize,
    fail_on_clear_bag: AtomicBool,
}

impl Faults {
    fn on_batch(&self) -> Result<()> {
        let call = self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fail_on = self.fail_on_batch.load(Ordering::SeqCst);
        if fail_on != 0 && call == fail_on {
            return Err(StoreError::Unavailable(format!(
                "injected failure on batch call {call}"
            )));
        }
        Ok(())
    }
}

/// In-memory store for tests and local development.
///
/// Conditional updates run under a single write lock, so updates against the
/// same record are linearizable exactly as the PostgreSQL backend's are.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`-th `apply_batch` call from now on fail (1-indexed).
    /// `None` disables the failure.
    pub fn set_fail_on_batch(&self, n: Option<usize>) {
        self.faults.batch_calls.store(0, Ordering::SeqCst);
        self.faults
            .fail_on_batch
            .store(n.unwrap_or(0), Ordering::SeqCst);
    }

    /// Makes clearing a bag inside a transaction fail.
    pub fn set_fail_on_clear_bag(&self, fail: bool) {
        self.faults.fail_on_clear_bag.store(fail, Ordering::SeqCst);
    }

    /// Number of `apply_batch` calls since the last `set_fail_on_batch`.
    pub fn batch_call_count(&self) -> usize {
        self.faults.batch_calls.load(Ordering::SeqCst)
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl StockStore for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(product_id).cloned())
    }

    async fn save_product(&self, product: Product) -> Result<()> {
        let mut state = self.state.write().await;
        state.products.insert(product.id.clone(), product);
        Ok(())
    }

    async fn apply_batch(&self, updates: &[StockUpdate]) -> Result<BatchOutcome> {
        self.faults.on_batch()?;
        let mut state = self.state.write().await;
        Ok(MemoryState::apply_updates(&mut state.products, updates))
    }

    async fn begin(&self) -> Result<InMemoryTransaction> {
        let guard = self.state.clone().write_owned().await;
        Ok(InMemoryTransaction {
            guard,
            faults: self.faults.clone(),
            products: HashMap::new(),
            orders: Vec::new(),
            cleared_bags: Vec::new(),
            completed_sessions: Vec::new(),
        })
    }
}

/// Transaction over the in-memory store.
///
/// Holds the store's write lock for its whole lifetime and stages every write
/// on copies; `commit` publishes them at once, drop discards them.
pub struct InMemoryTransaction {
    guard: OwnedRwLockWriteGuard<MemoryState>,
    faults: Arc<Faults>,
    products: HashMap<ProductId, Product>,
    orders: Vec<Order>,
    cleared_bags: Vec<UserId>,
    completed_sessions: Vec<SessionId>,
}

#[async_trait]
impl StockTransaction for InMemoryTransaction {
    async fn apply_batch(&mut self, updates: &[StockUpdate]) -> Result<BatchOutcome> {
        self.faults.on_batch()?;
        for update in updates {
            let id = &update.target.product_id;
            if !self.products.contains_key(id)
                && let Some(product) = self.guard.products.get(id)
            {
                self.products.insert(id.clone(), product.clone());
            }
        }
        Ok(MemoryState::apply_updates(&mut self.products, updates))
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let exists = self.guard.orders.contains_key(&order.session_id)
            || self.orders.iter().any(|o| o.session_id == order.session_id);
        if exists {
            return Err(StoreError::DuplicateOrder(order.session_id.clone()));
        }
        self.orders.push(order.clone());
        Ok(())
    }

    async fn clear_bag(&mut self, user_id: &UserId) -> Result<u64> {
        if self.faults.fail_on_clear_bag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "injected failure clearing bag of {user_id}"
            )));
        }
        if self.cleared_bags.contains(user_id) {
            return Ok(0);
        }
        let removed = self.guard.bags.get(user_id).map_or(0, Vec::len) as u64;
        self.cleared_bags.push(user_id.clone());
        Ok(removed)
    }

    async fn release_session_holds(&mut self, session_id: &SessionId) -> Result<u64> {
        let held: Vec<ProductId> = self
            .guard
            .products
            .iter()
            .filter(|(id, product)| {
                !self.products.contains_key(*id) && product.is_held_by(session_id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in held {
            if let Some(product) = self.guard.products.get(&id) {
                self.products.insert(id, product.clone());
            }
        }
        Ok(self
            .products
            .values_mut()
            .map(|product| product.release_session(session_id))
            .sum())
    }

    async fn complete_session(&mut self, session_id: &SessionId) -> Result<bool> {
        let active = self
            .guard
            .sessions
            .get(session_id)
            .is_some_and(|s| s.status == SessionStatus::Active);
        if !active || self.completed_sessions.contains(session_id) {
            return Ok(false);
        }
        self.completed_sessions.push(session_id.clone());
        Ok(true)
    }

    async fn commit(self) -> Result<()> {
        let InMemoryTransaction {
            mut guard,
            products,
            orders,
            cleared_bags,
            completed_sessions,
            ..
        } = self;

        guard.products.extend(products);
        for order in orders {
            guard.orders.insert(order.session_id.clone(), order);
        }
        for user_id in cleared_bags {
            guard.bags.remove(&user_id);
        }
        for session_id in completed_sessions {
            if let Some(session) = guard.sessions.get_mut(&session_id) {
                session.status = SessionStatus::Completed;
                session.stock_released = true;
            }
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_session(&self, session: &CheckoutSession) -> Result<()> {
        let mut state = self.state.write().await;
        if state.sessions.contains_key(&session.session_id) {
            return Err(StoreError::DuplicateSession(session.session_id.clone()));
        }
        state
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<CheckoutSession>> {
        Ok(self.state.read().await.sessions.get(session_id).cloned())
    }

    async fn transition_session(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> Result<Option<CheckoutSession>> {
        let mut state = self.state.write().await;
        match state.sessions.get_mut(session_id) {
            Some(session) if session.status.can_transition_to(status) => {
                session.status = status;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<CheckoutSession>> {
        let state = self.state.read().await;
        let mut expired: Vec<_> = state
            .sessions
            .values()
            .filter(|s| s.is_expired_at(now))
            .cloned()
            .collect();
        expired.sort_by_key(|s| s.expires_at);
        Ok(expired)
    }

    async fn list_unreleased_sessions(&self) -> Result<Vec<CheckoutSession>> {
        let state = self.state.read().await;
        let mut unreleased: Vec<_> = state
            .sessions
            .values()
            .filter(|s| s.needs_stock_release())
            .cloned()
            .collect();
        unreleased.sort_by_key(|s| s.expires_at);
        Ok(unreleased)
    }

    async fn mark_stock_released(&self, session_id: &SessionId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.stock_released = true;
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn get_key(&self, key: &SessionId) -> Result<Option<IdempotencyRecord>> {
        Ok(self.state.read().await.idempotency.get(key).cloned())
    }

    async fn try_lock(
        &self,
        key: &SessionId,
        now: DateTime<Utc>,
        lock_expiry: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        if state
            .idempotency
            .get(key)
            .is_some_and(|record| record.is_effective(now))
        {
            return Ok(false);
        }
        state.idempotency.insert(
            key.clone(),
            IdempotencyRecord::pending(key.clone(), lock_expiry),
        );
        Ok(true)
    }

    async fn mark_completed(&self, key: &SessionId, processed_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .idempotency
            .entry(key.clone())
            .or_insert_with(|| IdempotencyRecord::pending(key.clone(), processed_at));
        record.status = IdempotencyStatus::Completed;
        record.processed_at = Some(processed_at);
        Ok(())
    }

    async fn release_lock(&self, key: &SessionId) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .idempotency
            .get(key)
            .is_some_and(|record| record.status == IdempotencyStatus::Pending)
        {
            state.idempotency.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn get_order_by_session(&self, session_id: &SessionId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(session_id).cloned())
    }

    async fn count_orders_for_session(&self, session_id: &SessionId) -> Result<u64> {
        Ok(u64::from(
            self.state.read().await.orders.contains_key(session_id),
        ))
    }
}

#[async_trait]
impl BagStore for InMemoryStore {
    async fn add_to_bag(&self, user_id: &UserId, item: LineItem) -> Result<()> {
        let mut state = self.state.write().await;
        state.bags.entry(user_id.clone()).or_default().push(item);
        Ok(())
    }

    async fn get_bag(&self, user_id: &UserId) -> Result<Vec<LineItem>> {
        Ok(self
            .state
            .read()
            .await
            .bags
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}
