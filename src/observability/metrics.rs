//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mws_requests_total` (counter): requests by method and status
//! - `mws_request_duration_seconds` (histogram): time from dispatch to response
//! - `mws_rejections_total` (counter): pipeline rejections by reason
//! - `mws_active_connections` (gauge): open client connections
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed
//! - The Prometheus exporter is opt-in and serves on its own address

use axum::http::{Method, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

pub const REQUESTS_TOTAL: &str = "mws_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "mws_request_duration_seconds";
pub const REJECTIONS_TOTAL: &str = "mws_rejections_total";
pub const ACTIVE_CONNECTIONS: &str = "mws_active_connections";

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    ::metrics::describe_counter!(REQUESTS_TOTAL, "Requests served, by method and status");
    ::metrics::describe_histogram!(
        REQUEST_DURATION_SECONDS,
        ::metrics::Unit::Seconds,
        "Time from dispatch to response"
    );
    ::metrics::describe_counter!(REJECTIONS_TOTAL, "Requests refused before reaching a handler");
    ::metrics::describe_gauge!(ACTIVE_CONNECTIONS, "Open client connections");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &Method, status: StatusCode, elapsed: Duration) {
    ::metrics::counter!(
        REQUESTS_TOTAL,
        "method" => method.as_str().to_string(),
        "status" => status.as_str().to_string()
    )
    .increment(1);
    ::metrics::histogram!(REQUEST_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

pub fn record_rejection(reason: &'static str) {
    ::metrics::counter!(REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

pub fn set_active_connections(count: u64) {
    ::metrics::gauge!(ACTIVE_CONNECTIONS).set(count as f64);
}
