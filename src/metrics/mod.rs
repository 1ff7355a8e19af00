//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Lookups initiated and received
//! - Callback correlation hits and misses
//! - Responses dispatched to the switch
//! - Workflow hand-offs

use crate::error::ResultExt;
use crate::party::{OutcomeKind, PartyIdType};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Lookup metrics
    pub static ref LOOKUPS_INITIATED: CounterVec = register_counter_vec!(
        "party_lookups_initiated_total",
        "Total outbound party lookups sent to the switch",
        &["id_type"]
    ).unwrap();

    pub static ref LOOKUPS_RECEIVED: CounterVec = register_counter_vec!(
        "party_lookups_received_total",
        "Total inbound party lookups received from the switch",
        &["id_type"]
    ).unwrap();

    // Correlation metrics
    pub static ref CALLBACKS_RECEIVED: CounterVec = register_counter_vec!(
        "party_callbacks_received_total",
        "Total lookup callbacks received by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref CORRELATION_MISSES: CounterVec = register_counter_vec!(
        "party_correlation_misses_total",
        "Total callbacks with no live transaction context",
        &["id_type"]
    ).unwrap();

    pub static ref CACHED_CONTEXTS: Gauge = register_gauge!(
        "party_cached_contexts",
        "Transaction contexts currently held in the cache"
    ).unwrap();

    // Dispatch metrics
    pub static ref RESPONSES_DISPATCHED: CounterVec = register_counter_vec!(
        "party_responses_dispatched_total",
        "Total responses delivered to the switch",
        &["outcome"]
    ).unwrap();

    pub static ref DISPATCH_FAILURES: CounterVec = register_counter_vec!(
        "party_dispatch_failures_total",
        "Total responses the switch did not accept",
        &["outcome"]
    ).unwrap();

    pub static ref OUTBOUND_LATENCY: HistogramVec = register_histogram_vec!(
        "party_outbound_latency_seconds",
        "Latency of outbound switch calls",
        &["method"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // Workflow metrics
    pub static ref WORKFLOW_COMMANDS: CounterVec = register_counter_vec!(
        "party_workflow_commands_total",
        "Total workflow commands executed by kind and result",
        &["kind", "result"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "party_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> crate::error::LookupResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .internal("bind metrics listener")?;
        axum::serve(listener, app)
            .await
            .internal("serve metrics")?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_lookup_initiated(id_type: PartyIdType) {
    LOOKUPS_INITIATED
        .with_label_values(&[id_type.as_str()])
        .inc();
}

pub fn record_inbound_lookup(id_type: PartyIdType) {
    LOOKUPS_RECEIVED
        .with_label_values(&[id_type.as_str()])
        .inc();
}

pub fn record_callback(kind: OutcomeKind) {
    CALLBACKS_RECEIVED
        .with_label_values(&[kind.as_str()])
        .inc();
}

pub fn record_correlation_miss(id_type: PartyIdType) {
    CORRELATION_MISSES
        .with_label_values(&[id_type.as_str()])
        .inc();
}

pub fn record_cache_size(entries: usize) {
    CACHED_CONTEXTS.set(entries as f64);
}

pub fn record_dispatch(kind: OutcomeKind) {
    RESPONSES_DISPATCHED
        .with_label_values(&[kind.as_str()])
        .inc();
}

pub fn record_dispatch_failure(kind: OutcomeKind) {
    DISPATCH_FAILURES
        .with_label_values(&[kind.as_str()])
        .inc();
}

pub fn record_outbound_latency(method: &str, latency_secs: f64) {
    OUTBOUND_LATENCY
        .with_label_values(&[method])
        .observe(latency_secs);
}

pub fn record_workflow_command(kind: &str, ok: bool) {
    WORKFLOW_COMMANDS
        .with_label_values(&[kind, if ok { "ok" } else { "error" }])
        .inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}
