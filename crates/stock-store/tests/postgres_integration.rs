//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p stock-store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use serial_test::serial;
use sqlx::PgPool;
use stock_store::{
    BagStore, CheckoutSession, IdempotencyStore, LineItem, Order, OrderStore, PostgresStore,
    Product, ProductId, SessionId, SessionStatus, SessionStore, StockStore, StockTarget,
    StockTransaction, StockUpdate, StoreError, UserId,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_checkout_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE products, stock_records, stock_reservations, checkout_sessions, idempotency_keys, orders, bag_items",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

fn simple(id: &str) -> StockTarget {
    StockTarget {
        product_id: ProductId::new(id),
        variant: None,
    }
}

fn sized(id: &str, label: &str) -> StockTarget {
    StockTarget {
        product_id: ProductId::new(id),
        variant: Some(label.to_string()),
    }
}

#[tokio::test]
#[serial]
async fn save_and_load_simple_and_variant_products() {
    let store = get_test_store().await;
    store.save_product(Product::simple("SKU-001", 4)).await.unwrap();
    store
        .save_product(Product::with_variants("TEE", [("S", 2), ("M", 3)]))
        .await
        .unwrap();

    let simple = store.get_product(&ProductId::new("SKU-001")).await.unwrap().unwrap();
    assert_eq!(simple.available(None), Some(4));

    let tee = store.get_product(&ProductId::new("TEE")).await.unwrap().unwrap();
    assert_eq!(tee.available(Some("M")), Some(3));
    assert_eq!(tee.aggregate_quantity(), 5);
    assert!(tee.record(None).is_none());

    assert!(store.get_product(&ProductId::new("NOPE")).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn hold_release_and_commit_follow_match_conditions() {
    let store = get_test_store().await;
    store.save_product(Product::simple("SKU-001", 3)).await.unwrap();
    store
        .save_product(Product::with_variants("TEE", [("S", 1)]))
        .await
        .unwrap();
    let s1 = SessionId::new("cs_test_one");

    let outcome = store
        .apply_batch(&[
            StockUpdate::hold(simple("SKU-001"), s1.clone(), 2, Utc::now()),
            StockUpdate::hold(sized("TEE", "S"), s1.clone(), 2, Utc::now()),
            StockUpdate::hold(simple("TEE"), s1.clone(), 1, Utc::now()),
        ])
        .await
        .unwrap();
    assert_eq!(outcome.op_matched, vec![true, false, false]);

    let product = store.get_product(&ProductId::new("SKU-001")).await.unwrap().unwrap();
    assert_eq!(product.record(None).unwrap().reserved, 2);
    product.check_invariants().unwrap();

    let outcome = store
        .apply_batch(&[StockUpdate::release(simple("SKU-001"), s1.clone())])
        .await
        .unwrap();
    assert_eq!(outcome.matched, 1);
    let again = store
        .apply_batch(&[StockUpdate::release(simple("SKU-001"), s1.clone())])
        .await
        .unwrap();
    assert_eq!(again.matched, 0);

    store
        .apply_batch(&[StockUpdate::hold(simple("SKU-001"), s1.clone(), 3, Utc::now())])
        .await
        .unwrap();
    let mut tx = store.begin().await.unwrap();
    let mismatched = tx
        .apply_batch(&[StockUpdate::commit(simple("SKU-001"), s1.clone(), 2)])
        .await
        .unwrap();
    assert_eq!(mismatched.matched, 0);
    let outcome = tx
        .apply_batch(&[StockUpdate::commit(simple("SKU-001"), s1.clone(), 3)])
        .await
        .unwrap();
    assert_eq!(outcome.matched, 1);
    tx.commit().await.unwrap();

    let product = store.get_product(&ProductId::new("SKU-001")).await.unwrap().unwrap();
    let record = product.record(None).unwrap();
    assert_eq!(record.quantity, 0);
    assert_eq!(record.reserved, 0);
    assert!(record.reservations.is_empty());
    assert!(!record.in_stock);
}

#[tokio::test]
#[serial]
async fn concurrent_holds_on_last_unit_have_one_winner() {
    let store = get_test_store().await;
    store.save_product(Product::simple("LAST", 1)).await.unwrap();

    let a = store.clone();
    let b = store.clone();
    let (ra, rb) = tokio::join!(
        async move {
            a.apply_batch(&[StockUpdate::hold(simple("LAST"), SessionId::new("cs_test_a"), 1, Utc::now())])
                .await
        },
        async move {
            b.apply_batch(&[StockUpdate::hold(simple("LAST"), SessionId::new("cs_test_b"), 1, Utc::now())])
                .await
        },
    );

    let wins = ra.unwrap().matched + rb.unwrap().matched;
    assert_eq!(wins, 1);

    let product = store.get_product(&ProductId::new("LAST")).await.unwrap().unwrap();
    assert_eq!(product.record(None).unwrap().reserved, 1);
    assert_eq!(product.record(None).unwrap().reservations.len(), 1);
}

#[tokio::test]
#[serial]
async fn rolled_back_transaction_leaves_everything_untouched() {
    let store = get_test_store().await;
    store.save_product(Product::simple("SKU-001", 2)).await.unwrap();
    let s1 = SessionId::new("cs_test_one");
    let user = UserId::new("user-1");
    let now = Utc::now();
    store
        .insert_session(&CheckoutSession::new(s1.clone(), user.clone(), now, now + Duration::minutes(30)))
        .await
        .unwrap();
    store.add_to_bag(&user, LineItem::new("SKU-001", 1)).await.unwrap();
    store
        .apply_batch(&[StockUpdate::hold(simple("SKU-001"), s1.clone(), 1, now)])
        .await
        .unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.apply_batch(&[StockUpdate::commit(simple("SKU-001"), s1.clone(), 1)])
        .await
        .unwrap();
    tx.insert_order(&Order::new(s1.clone(), user.clone(), vec![LineItem::new("SKU-001", 1)], now))
        .await
        .unwrap();
    assert_eq!(tx.clear_bag(&user).await.unwrap(), 1);
    assert!(tx.complete_session(&s1).await.unwrap());
    tx.rollback().await.unwrap();

    let product = store.get_product(&ProductId::new("SKU-001")).await.unwrap().unwrap();
    assert_eq!(product.record(None).unwrap().quantity, 2);
    assert_eq!(product.record(None).unwrap().reserved, 1);
    assert!(store.get_order_by_session(&s1).await.unwrap().is_none());
    assert_eq!(store.get_bag(&user).await.unwrap().len(), 1);
    assert_eq!(
        store.get_session(&s1).await.unwrap().unwrap().status,
        SessionStatus::Active
    );
}

#[tokio::test]
#[serial]
async fn order_uniqueness_is_enforced_per_session() {
    let store = get_test_store().await;
    let s1 = SessionId::new("cs_test_one");
    let user = UserId::new("user-1");

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&Order::new(s1.clone(), user.clone(), vec![], Utc::now()))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let result = tx
        .insert_order(&Order::new(s1.clone(), user, vec![], Utc::now()))
        .await;
    assert!(matches!(result, Err(StoreError::DuplicateOrder(_))));
    tx.rollback().await.unwrap();

    assert_eq!(store.count_orders_for_session(&s1).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn sessions_are_unique_and_transition_once() {
    let store = get_test_store().await;
    let now = Utc::now();
    let session = CheckoutSession::new(
        SessionId::new("cs_test_one"),
        UserId::new("user-1"),
        now - Duration::minutes(31),
        now - Duration::minutes(1),
    );
    store.insert_session(&session).await.unwrap();
    assert!(matches!(
        store.insert_session(&session).await,
        Err(StoreError::DuplicateSession(_))
    ));

    let expired = store.list_expired_sessions(now).await.unwrap();
    assert_eq!(expired.len(), 1);

    let updated = store
        .transition_session(&session.session_id, SessionStatus::Expired)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, SessionStatus::Expired);
    assert!(
        store
            .transition_session(&session.session_id, SessionStatus::Completed)
            .await
            .unwrap()
            .is_none()
    );
    assert!(store.list_expired_sessions(now).await.unwrap().is_empty());

    let unreleased = store.list_unreleased_sessions().await.unwrap();
    assert_eq!(unreleased.len(), 1);
    store.mark_stock_released(&session.session_id).await.unwrap();
    assert!(store.list_unreleased_sessions().await.unwrap().is_empty());
    assert!(store.get_session(&session.session_id).await.unwrap().unwrap().stock_released);
}

#[tokio::test]
#[serial]
async fn release_session_holds_clears_every_record_of_the_session() {
    let store = get_test_store().await;
    store.save_product(Product::simple("SKU-001", 3)).await.unwrap();
    store
        .save_product(Product::with_variants("TEE", [("S", 2), ("M", 2)]))
        .await
        .unwrap();
    let s1 = SessionId::new("cs_test_one");
    let tee_m = StockTarget {
        product_id: ProductId::new("TEE"),
        variant: Some("M".to_string()),
    };
    store
        .apply_batch(&[
            StockUpdate::hold(simple("SKU-001"), s1.clone(), 2, Utc::now()),
            StockUpdate::hold(tee_m.clone(), s1.clone(), 1, Utc::now()),
            StockUpdate::hold(tee_m, SessionId::new("cs_test_two"), 1, Utc::now()),
        ])
        .await
        .unwrap();

    let mut tx = store.begin().await.unwrap();
    assert_eq!(tx.release_session_holds(&s1).await.unwrap(), 2);
    tx.commit().await.unwrap();

    let simple_product = store.get_product(&ProductId::new("SKU-001")).await.unwrap().unwrap();
    assert_eq!(simple_product.record(None).unwrap().reserved, 0);
    let tee = store.get_product(&ProductId::new("TEE")).await.unwrap().unwrap();
    let m = tee.record(Some("M")).unwrap();
    assert_eq!(m.reserved, 1);
    assert_eq!(m.reservations.len(), 1);
    tee.check_invariants().unwrap();
}

#[tokio::test]
#[serial]
async fn idempotency_lock_blocks_until_stale() {
    let store = get_test_store().await;
    let key = SessionId::new("cs_test_one");
    let now = Utc::now();

    assert!(store.try_lock(&key, now, now + Duration::hours(1)).await.unwrap());
    assert!(!store.try_lock(&key, now, now + Duration::hours(1)).await.unwrap());

    let later = now + Duration::hours(2);
    assert!(store.try_lock(&key, later, later + Duration::hours(1)).await.unwrap());

    store.mark_completed(&key, later).await.unwrap();
    let record = store.get_key(&key).await.unwrap().unwrap();
    assert!(record.is_effective(later + Duration::days(30)));

    store.release_lock(&key).await.unwrap();
    assert!(store.get_key(&key).await.unwrap().is_some());
}
