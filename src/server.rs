//! # HTTP Server
//!
//! HTTP server for metrics and Kubernetes probes.
//!
//! Provides endpoints:
//! - `/healthz` - liveness probe, returns "Ok"
//! - `/readyz` - readiness probe, returns "Ok"
//! - `/metrics` - Prometheus metrics in text format

use anyhow::{Context, Result};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::observability::metrics;

pub async fn run(bind: &str) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler));

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind http server to {bind}"))?;

    info!(address = bind, "http server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn healthz_handler() -> &'static str {
    "Ok"
}

async fn readyz_handler() -> &'static str {
    "Ok"
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = metrics::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {}", e).into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}
