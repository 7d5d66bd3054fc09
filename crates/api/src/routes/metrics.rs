//! Prometheus metrics endpoint and metric descriptions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers help text for every metric the checkout subsystem records.
pub fn describe() {
    metrics::describe_counter!(
        "stock_reservations_total",
        "Checkouts whose stock was fully reserved"
    );
    metrics::describe_counter!(
        "stock_reservations_rejected_total",
        "Reservations refused for insufficient stock"
    );
    metrics::describe_counter!(
        "stock_rollback_failures_total",
        "Partial reservations that could not be rolled back"
    );
    metrics::describe_counter!(
        "bulk_write_batches_total",
        "Batches of conditional stock updates submitted"
    );
    metrics::describe_counter!("checkout_commits_total", "Checkouts committed into orders");
    metrics::describe_counter!(
        "checkout_commit_aborts_total",
        "Commit transactions rolled back"
    );
    metrics::describe_counter!(
        "checkout_duplicate_confirmations_total",
        "Payment confirmations absorbed as duplicates"
    );
    metrics::describe_counter!(
        "checkout_sessions_expired_total",
        "Checkout sessions moved to expired"
    );
    metrics::describe_counter!(
        "sweep_cleanup_deferred_total",
        "Expired sessions whose stock could not be released"
    );
    metrics::describe_counter!(
        "sweep_cleanup_recovered_total",
        "Deferred stock releases completed by a later sweep"
    );
    metrics::describe_histogram!(
        "sweep_duration_seconds",
        Unit::Seconds,
        "Duration of one expiry sweep"
    );
}

/// GET /metrics — returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
