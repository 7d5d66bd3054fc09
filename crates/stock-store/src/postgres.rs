use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row};
use uuid::Uuid;

use crate::store::{
    BagStore, IdempotencyStore, OrderStore, SessionStore, StockStore, StockTransaction,
};
use crate::{
    BatchOutcome, CheckoutSession, IdempotencyRecord, IdempotencyStatus, LineItem, Order, OrderId,
    Product, ProductId, ReservationEntry, Result, SessionId, SessionStatus, StockLevel,
    StockMutation, StockRecord, StockUpdate, StoreError, UserId,
};

const SIMPLE_LABEL: &str = "";

const HOLD_SQL: &str = r#"
    WITH target AS (
        UPDATE stock_records
        SET reserved = reserved + $4
        WHERE product_id = $1 AND variant_label = $2
          AND $4 > 0
          AND quantity - reserved >= $4
          AND ($2 = '' OR in_stock)
        RETURNING product_id, variant_label
    )
    INSERT INTO stock_reservations (product_id, variant_label, session_id, quantity, reserved_at)
    SELECT product_id, variant_label, $3, $4, $5 FROM target
"#;

const RELEASE_SQL: &str = r#"
    WITH removed AS (
        DELETE FROM stock_reservations
        WHERE product_id = $1 AND variant_label = $2 AND session_id = $3
        RETURNING quantity
    )
    UPDATE stock_records
    SET reserved = reserved - (SELECT SUM(quantity) FROM removed)::BIGINT
    WHERE product_id = $1 AND variant_label = $2
      AND EXISTS (SELECT 1 FROM removed)
"#;

const COMMIT_SQL: &str = r#"
    WITH held AS (
        SELECT SUM(quantity)::BIGINT AS amount
        FROM stock_reservations
        WHERE product_id = $1 AND variant_label = $2 AND session_id = $3
    ),
    removed AS (
        DELETE FROM stock_reservations r
        USING held
        WHERE r.product_id = $1 AND r.variant_label = $2 AND r.session_id = $3
          AND held.amount = $4
        RETURNING r.quantity
    )
    UPDATE stock_records s
    SET quantity = s.quantity - $4,
        reserved = s.reserved - $4,
        in_stock = s.in_stock AND s.quantity - $4 > 0
    WHERE s.product_id = $1 AND s.variant_label = $2
      AND EXISTS (SELECT 1 FROM removed)
"#;

const RELEASE_SESSION_SQL: &str = r#"
    WITH removed AS (
        DELETE FROM stock_reservations
        WHERE session_id = $1
        RETURNING product_id, variant_label, quantity
    ),
    held AS (
        SELECT product_id, variant_label, SUM(quantity)::BIGINT AS amount
        FROM removed
        GROUP BY product_id, variant_label
    )
    UPDATE stock_records s
    SET reserved = s.reserved - held.amount
    FROM held
    WHERE s.product_id = held.product_id AND s.variant_label = held.variant_label
"#;

/// PostgreSQL-backed checkout store.
///
/// Each [`StockUpdate`] is executed as one statement whose `WHERE` clause is
/// the update's match condition, so row-level locking serializes competing
/// updates on the same stock record.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::debug!("checkout migrations applied");
        Ok(())
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::InvalidRecord(format!("{column} out of range: {value}")))
}

fn variant_label(update: &StockUpdate) -> &str {
    update.target.variant.as_deref().unwrap_or(SIMPLE_LABEL)
}

#[tracing::instrument(skip_all, fields(updates = updates.len()))]
async fn apply_updates(conn: &mut PgConnection, updates: &[StockUpdate]) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    for update in updates {
        let product_id = update.target.product_id.as_str();
        let label = variant_label(update);
        let session_id = update.session_id.as_str();

        let result = match &update.mutation {
            StockMutation::Hold {
                quantity,
                reserved_at,
            } => {
                sqlx::query(HOLD_SQL)
                    .bind(product_id)
                    .bind(label)
                    .bind(session_id)
                    .bind(i64::from(*quantity))
                    .bind(*reserved_at)
                    .execute(&mut *conn)
                    .await?
            }
            StockMutation::Release => {
                sqlx::query(RELEASE_SQL)
                    .bind(product_id)
                    .bind(label)
                    .bind(session_id)
                    .execute(&mut *conn)
                    .await?
            }
            StockMutation::Commit { quantity } => {
                sqlx::query(COMMIT_SQL)
                    .bind(product_id)
                    .bind(label)
                    .bind(session_id)
                    .bind(i64::from(*quantity))
                    .execute(&mut *conn)
                    .await?
            }
        };
        outcome.record(result.rows_affected() > 0);
    }
    Ok(outcome)
}

fn row_to_session(row: PgRow) -> Result<CheckoutSession> {
    let status: String = row.try_get("status")?;
    Ok(CheckoutSession {
        session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
        user_id: UserId::new(row.try_get::<String, _>("user_id")?),
        status: SessionStatus::parse(&status)
            .ok_or_else(|| StoreError::InvalidRecord(format!("unknown session status {status}")))?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        stock_released: row.try_get("stock_released")?,
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let lines: serde_json::Value = row.try_get("lines")?;
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
        user_id: UserId::new(row.try_get::<String, _>("user_id")?),
        lines: serde_json::from_value(lines)?,
        created_at: row.try_get("created_at")?,
    })
}

const SESSION_COLUMNS: &str =
    "session_id, user_id, status, created_at, expires_at, stock_released";

#[async_trait]
impl StockStore for PostgresStore {
    type Transaction = PostgresTransaction;

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        let has_variants: Option<bool> =
            sqlx::query_scalar("SELECT has_variants FROM products WHERE id = $1")
                .bind(product_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        let Some(has_variants) = has_variants else {
            return Ok(None);
        };

        let record_rows = sqlx::query(
            r#"
            SELECT variant_label, quantity, reserved, in_stock
            FROM stock_records
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut records: BTreeMap<String, StockRecord> = BTreeMap::new();
        for row in record_rows {
            let label: String = row.try_get("variant_label")?;
            records.insert(
                label,
                StockRecord {
                    quantity: to_u32(row.try_get("quantity")?, "quantity")?,
                    reserved: to_u32(row.try_get("reserved")?, "reserved")?,
                    reservations: Vec::new(),
                    in_stock: row.try_get("in_stock")?,
                },
            );
        }

        let reservation_rows = sqlx::query(
            r#"
            SELECT variant_label, session_id, quantity, reserved_at
            FROM stock_reservations
            WHERE product_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(product_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        for row in reservation_rows {
            let label: String = row.try_get("variant_label")?;
            if let Some(record) = records.get_mut(&label) {
                record.reservations.push(ReservationEntry {
                    session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
                    quantity: to_u32(row.try_get("quantity")?, "quantity")?,
                    reserved_at: row.try_get("reserved_at")?,
                });
            }
        }

        let stock = if has_variants {
            StockLevel::Variants(records)
        } else {
            let record = records.remove(SIMPLE_LABEL).ok_or_else(|| {
                StoreError::InvalidRecord(format!("simple product {product_id} has no stock row"))
            })?;
            StockLevel::Simple(record)
        };

        Ok(Some(Product {
            id: product_id.clone(),
            stock,
        }))
    }

    async fn save_product(&self, product: Product) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(product.id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO products (id, has_variants) VALUES ($1, $2)")
            .bind(product.id.as_str())
            .bind(matches!(product.stock, StockLevel::Variants(_)))
            .execute(&mut *tx)
            .await?;

        for (label, record) in product.stock.records() {
            let label = label.unwrap_or(SIMPLE_LABEL);
            sqlx::query(
                r#"
                INSERT INTO stock_records (product_id, variant_label, quantity, reserved, in_stock)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(product.id.as_str())
            .bind(label)
            .bind(i64::from(record.quantity))
            .bind(i64::from(record.reserved))
            .bind(record.in_stock)
            .execute(&mut *tx)
            .await?;

            for entry in &record.reservations {
                sqlx::query(
                    r#"
                    INSERT INTO stock_reservations (product_id, variant_label, session_id, quantity, reserved_at)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(product.id.as_str())
                .bind(label)
                .bind(entry.session_id.as_str())
                .bind(i64::from(entry.quantity))
                .bind(entry.reserved_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn apply_batch(&self, updates: &[StockUpdate]) -> Result<BatchOutcome> {
        let mut conn = self.pool.acquire().await?;
        apply_updates(&mut *conn, updates).await
    }

    async fn begin(&self) -> Result<PostgresTransaction> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }
}

/// A `sqlx` transaction on the checkout tables.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StockTransaction for PostgresTransaction {
    async fn apply_batch(&mut self, updates: &[StockUpdate]) -> Result<BatchOutcome> {
        apply_updates(&mut *self.tx, updates).await
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let lines = serde_json::to_value(&order.lines)?;
        sqlx::query(
            r#"
            INSERT INTO orders (id, session_id, user_id, lines, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.session_id.as_str())
        .bind(order.user_id.as_str())
        .bind(lines)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_session")
            {
                return StoreError::DuplicateOrder(order.session_id.clone());
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn clear_bag(&mut self, user_id: &UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM bag_items WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn release_session_holds(&mut self, session_id: &SessionId) -> Result<u64> {
        let result = sqlx::query(RELEASE_SESSION_SQL)
            .bind(session_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn complete_session(&mut self, session_id: &SessionId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE checkout_sessions SET status = 'completed', stock_released = TRUE
            WHERE session_id = $1 AND status = 'active'
            "#,
        )
        .bind(session_id.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn insert_session(&self, session: &CheckoutSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkout_sessions
                (session_id, user_id, status, created_at, expires_at, stock_released)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.session_id.as_str())
        .bind(session.user_id.as_str())
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.stock_released)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::DuplicateSession(session.session_id.clone());
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<CheckoutSession>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM checkout_sessions WHERE session_id = $1"
        ))
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_session).transpose()
    }

    async fn transition_session(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> Result<Option<CheckoutSession>> {
        if !SessionStatus::Active.can_transition_to(status) {
            return Ok(None);
        }
        let row = sqlx::query(&format!(
            r#"
            UPDATE checkout_sessions SET status = $2
            WHERE session_id = $1 AND status = 'active'
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id.as_str())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_session).transpose()
    }

    async fn list_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<CheckoutSession>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM checkout_sessions
            WHERE status = 'active' AND expires_at < $1
            ORDER BY expires_at ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_session).collect()
    }

    async fn list_unreleased_sessions(&self) -> Result<Vec<CheckoutSession>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM checkout_sessions
            WHERE status IN ('expired', 'failed') AND NOT stock_released
            ORDER BY expires_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_session).collect()
    }

    async fn mark_stock_released(&self, session_id: &SessionId) -> Result<()> {
        sqlx::query("UPDATE checkout_sessions SET stock_released = TRUE WHERE session_id = $1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for PostgresStore {
    async fn get_key(&self, key: &SessionId) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT key, status, processed_at, lock_expiry FROM idempotency_keys WHERE key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status")?;
                Ok(Some(IdempotencyRecord {
                    key: SessionId::new(row.try_get::<String, _>("key")?),
                    status: IdempotencyStatus::parse(&status).ok_or_else(|| {
                        StoreError::InvalidRecord(format!("unknown idempotency status {status}"))
                    })?,
                    processed_at: row.try_get("processed_at")?,
                    lock_expiry: row.try_get("lock_expiry")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn try_lock(
        &self,
        key: &SessionId,
        now: DateTime<Utc>,
        lock_expiry: DateTime<Utc>,
    ) -> Result<bool> {
        let acquired: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO idempotency_keys (key, status, processed_at, lock_expiry)
            VALUES ($1, 'pending', NULL, $3)
            ON CONFLICT (key) DO UPDATE SET
                status = 'pending',
                processed_at = NULL,
                lock_expiry = EXCLUDED.lock_expiry
            WHERE idempotency_keys.status = 'pending'
              AND idempotency_keys.lock_expiry <= $2
            RETURNING key
            "#,
        )
        .bind(key.as_str())
        .bind(now)
        .bind(lock_expiry)
        .fetch_optional(&self.pool)
        .await?;
        Ok(acquired.is_some())
    }

    async fn mark_completed(&self, key: &SessionId, processed_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, status, processed_at, lock_expiry)
            VALUES ($1, 'completed', $2, $2)
            ON CONFLICT (key) DO UPDATE SET
                status = 'completed',
                processed_at = EXCLUDED.processed_at
            "#,
        )
        .bind(key.as_str())
        .bind(processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_lock(&self, key: &SessionId) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND status = 'pending'")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn get_order_by_session(&self, session_id: &SessionId) -> Result<Option<Order>> {
        let row = sqlx::query(
            "SELECT id, session_id, user_id, lines, created_at FROM orders WHERE session_id = $1",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_order).transpose()
    }

    async fn count_orders_for_session(&self, session_id: &SessionId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE session_id = $1")
            .bind(session_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl BagStore for PostgresStore {
    async fn add_to_bag(&self, user_id: &UserId, item: LineItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bag_items (user_id, product_id, variant_label, quantity)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id.as_str())
        .bind(item.product_id.as_str())
        .bind(item.variant.as_deref())
        .bind(i64::from(item.quantity))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_bag(&self, user_id: &UserId) -> Result<Vec<LineItem>> {
        let rows = sqlx::query(
            "SELECT product_id, variant_label, quantity FROM bag_items WHERE user_id = $1 ORDER BY id ASC",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LineItem {
                    product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
                    quantity: to_u32(row.try_get("quantity")?, "quantity")?,
                    variant: row.try_get("variant_label")?,
                })
            })
            .collect()
    }
}
