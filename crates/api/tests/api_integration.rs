//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::config::Config;
use api::routes::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use lifecycle::InMemoryPaymentGateway;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use stock_store::{InMemoryStore, Product, StockStore};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

type TestState = Arc<AppState<InMemoryStore, InMemoryPaymentGateway>>;

async fn setup_with_config(products: Vec<Product>, config: Config) -> (axum::Router, TestState) {
    let store = InMemoryStore::new();
    for product in products {
        store.save_product(product).await.unwrap();
    }
    let state = api::create_state(store, InMemoryPaymentGateway::new(), &config);
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn setup(products: Vec<Product>) -> axum::Router {
    setup_with_config(products, Config::default()).await.0
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn begin_checkout(app: &axum::Router, items: Value) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/checkout",
        Some(json!({ "user_id": "buyer-1", "items": items })),
    )
    .await
}

async fn webhook(app: &axum::Router, event_type: &str, session_id: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/webhooks/payment",
        Some(json!({ "type": event_type, "session_id": session_id })),
    )
    .await
}

#[tokio::test]
async fn test_health_check() {
    let app = setup(vec![]).await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup(vec![Product::simple("A", 1)]).await;
    begin_checkout(&app, json!([{ "product_id": "A", "quantity": 1 }])).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("stock_reservations_total"));
}

#[tokio::test]
async fn test_checkout_reserves_stock() {
    let app = setup(vec![
        Product::simple("SKU-001", 5),
        Product::with_variants("TEE", [("S", 2), ("M", 2)]),
    ])
    .await;

    let (status, json) = begin_checkout(
        &app,
        json!([
            { "product_id": "SKU-001", "quantity": 2 },
            { "product_id": "TEE", "quantity": 1, "variant": "M" }
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let session_id = json["session_id"].as_str().unwrap().to_string();
    assert!(session_id.starts_with("cs_"));
    assert!(json["url"].as_str().unwrap().contains(&session_id));

    let (status, stock) = send(&app, "GET", "/products/SKU-001/stock", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock["quantity"], 5);
    assert_eq!(stock["reserved"], 2);
    assert_eq!(stock["records"][0]["available"], 3);
    assert_eq!(stock["records"][0]["reservations"][0]["session_id"], session_id);

    let (_, tee) = send(&app, "GET", "/products/TEE/stock", None).await;
    assert_eq!(tee["reserved"], 1);

    let uri = format!("/checkout-sessions/{session_id}");
    let (status, session) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["status"], "active");
    assert_eq!(session["user_id"], "buyer-1");
}

#[tokio::test]
async fn test_checkout_insufficient_stock_conflict() {
    let app = setup(vec![Product::simple("A", 5), Product::simple("B", 1)]).await;

    let (status, json) = begin_checkout(
        &app,
        json!([
            { "product_id": "A", "quantity": 2 },
            { "product_id": "B", "quantity": 2 }
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("Insufficient stock for B"));

    let (_, stock) = send(&app, "GET", "/products/A/stock", None).await;
    assert_eq!(stock["reserved"], 0);
}

#[tokio::test]
async fn test_checkout_rejects_invalid_quantities() {
    let app = setup(vec![Product::simple("A", 5)]).await;

    for quantity in [0, -3] {
        let (status, json) =
            begin_checkout(&app, json!([{ "product_id": "A", "quantity": quantity }])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "quantity {quantity}");
        assert!(json["error"].as_str().unwrap().contains("Invalid quantity"));
    }

    let (status, _) = begin_checkout(&app, json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_payment_webhook_commits_once() {
    let app = setup(vec![Product::simple("A", 1)]).await;
    let (_, started) = begin_checkout(&app, json!([{ "product_id": "A", "quantity": 1 }])).await;
    let session_id = started["session_id"].as_str().unwrap();

    let (status, first) = webhook(&app, "checkout.session.completed", session_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "committed");
    assert!(first["order_id"].is_string());

    let (status, second) = webhook(&app, "checkout.session.completed", session_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["outcome"], "duplicate");
    assert_eq!(second["reason"], "completed");

    let (_, stock) = send(&app, "GET", "/products/A/stock", None).await;
    assert_eq!(stock["quantity"], 0);
    assert_eq!(stock["reserved"], 0);
    assert_eq!(stock["records"][0]["in_stock"], false);

    let uri = format!("/checkout-sessions/{session_id}");
    let (_, session) = send(&app, "GET", &uri, None).await;
    assert_eq!(session["status"], "completed");
}

#[tokio::test]
async fn test_expiry_webhook_releases_stock() {
    let app = setup(vec![Product::simple("A", 3)]).await;
    let (_, started) = begin_checkout(&app, json!([{ "product_id": "A", "quantity": 2 }])).await;
    let session_id = started["session_id"].as_str().unwrap();

    let (status, first) = webhook(&app, "checkout.session.expired", session_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "expired");

    let (_, again) = webhook(&app, "checkout.session.expired", session_id).await;
    assert_eq!(again["outcome"], "already_expired");

    let (_, stock) = send(&app, "GET", "/products/A/stock", None).await;
    assert_eq!(stock["reserved"], 0);

    let (status, late) = webhook(&app, "checkout.session.completed", session_id).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(late["error"].is_string());
}

#[tokio::test]
async fn test_unknown_webhook_event_is_ignored() {
    let app = setup(vec![]).await;

    let (status, json) = webhook(&app, "invoice.paid", "cs_test_whatever1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "ignored");
}

#[tokio::test]
async fn test_admin_expire_by_url() {
    let app = setup(vec![Product::simple("A", 3)]).await;
    let (_, started) = begin_checkout(&app, json!([{ "product_id": "A", "quantity": 3 }])).await;

    let (status, outcome) = send(
        &app,
        "POST",
        "/admin/checkout-sessions/expire",
        Some(json!({ "reference": started["url"] })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["session_id"], started["session_id"]);

    let (_, again) = send(
        &app,
        "POST",
        "/admin/checkout-sessions/expire",
        Some(json!({ "reference": started["session_id"] })),
    )
    .await;
    assert_eq!(again["success"], false);
    assert_eq!(again["message"], "already expired");
}

#[tokio::test]
async fn test_admin_expire_rejects_malformed_reference() {
    let app = setup(vec![]).await;

    let (status, json) = send(
        &app,
        "POST",
        "/admin/checkout-sessions/expire",
        Some(json!({ "reference": "not a session" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Malformed session reference"));
}

#[tokio::test]
async fn test_admin_sweep_expires_overdue_sessions() {
    let config = Config {
        session_ttl_secs: -60,
        ..Config::default()
    };
    let (app, state) = setup_with_config(vec![Product::simple("A", 4)], config).await;
    begin_checkout(&app, json!([{ "product_id": "A", "quantity": 1 }])).await;
    begin_checkout(&app, json!([{ "product_id": "A", "quantity": 2 }])).await;

    let (status, report) = send(&app, "POST", "/admin/sweep", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["scanned"], 2);
    assert_eq!(report["expired"], 2);
    assert_eq!(report["items_released"], 2);
    let product = state.store.get_product(&"A".into()).await.unwrap().unwrap();
    assert_eq!(product.aggregate_reserved(), 0);

    let (_, second) = send(&app, "POST", "/admin/sweep", None).await;
    assert_eq!(second["scanned"], 0);
}

#[tokio::test]
async fn test_not_found_responses() {
    let app = setup(vec![]).await;

    let (status, json) = send(&app, "GET", "/products/NOPE/stock", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].is_string());

    let (status, _) = send(&app, "GET", "/checkout-sessions/cs_test_missing00", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = webhook(&app, "checkout.session.completed", "cs_test_missing00").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
