//! Prometheus metrics for the hitspool services.
//!
//! The Sender serves these at `/metrics` when `sender.metrics_bind` is set.
//! Workers record into the same registry but do not expose it.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{self, Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Request lifecycle
pub static REQUESTS_ADMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hitspool_requests_admitted_total",
        "Total number of requests admitted to the queue",
    )
    .expect("metric creation failed")
});

pub static REQUESTS_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hitspool_requests_rejected_total",
        "Total number of client requests answered with ERROR",
    )
    .expect("metric creation failed")
});

pub static REQUESTS_FINISHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hitspool_requests_finished_total",
            "Total requests finished by aggregate status",
        ),
        &["status"],
    )
    .expect("metric creation failed")
});

pub static REQUESTS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hitspool_requests_expired_total",
        "Total number of requests removed by the expiry sweep",
    )
    .expect("metric creation failed")
});

pub static HOST_REPORTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hitspool_host_reports_total",
            "Total envelopes handled by the RequestMonitor by message type",
        ),
        &["msgtype"],
    )
    .expect("metric creation failed")
});

pub static QUEUED_REQUESTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "hitspool_queued_requests",
        "Requests cached by the RequestMonitor, active one included",
    )
    .expect("metric creation failed")
});

// Delivery
pub static FINALIZE_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hitspool_finalize_errors_total",
            "Total delivery failures in the Sender by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

// Worker
pub static WORKER_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hitspool_worker_outcomes_total",
            "Total worker results by terminal message type",
        ),
        &["msgtype"],
    )
    .expect("metric creation failed")
});

pub static TRANSPORT_FALLBACKS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hitspool_transport_fallbacks_total",
        "Total transfers retried with the next backend",
    )
    .expect("metric creation failed")
});

// Monitoring sink
pub static LIVE_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hitspool_live_messages_dropped_total",
        "Monitoring messages dropped because the queue was full or no endpoint is set",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(REQUESTS_ADMITTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUESTS_REJECTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUESTS_FINISHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUESTS_EXPIRED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(HOST_REPORTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(QUEUED_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FINALIZE_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(WORKER_OUTCOMES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TRANSPORT_FALLBACKS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LIVE_DROPPED.clone()))
            .expect("metric registration failed");
    });
}

/// Handler for the `/metrics` endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a finished request.
pub fn record_finished(status: hitspool_core::RequestStatus) {
    REQUESTS_FINISHED.with_label_values(&[status.as_str()]).inc();
}
