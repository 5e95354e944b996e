//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `azuremsi_sync_resources_success` - successful resource syncs, by subscription and resource kind
//! - `azuremsi_sync_resources_errors` - failed resource syncs, by subscription and resource kind
//! - `azuremsi_sync_duration` - service discovery duration per subscription (seconds)
//! - `azuremsi_sync_time` - last successful service discovery per subscription (unix seconds)

use anyhow::Result;
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static SYNC_RESOURCES_SUCCESS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "azuremsi_sync_resources_success",
            "Azure MSI operator successful resource syncs",
        ),
        &["subscription", "resource"],
    )
    .expect("Failed to create SYNC_RESOURCES_SUCCESS metric - this should never happen")
});

static SYNC_RESOURCES_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "azuremsi_sync_resources_errors",
            "Azure MSI operator failed resource syncs",
        ),
        &["subscription", "resource"],
    )
    .expect("Failed to create SYNC_RESOURCES_ERRORS metric - this should never happen")
});

static SYNC_DURATION: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new("azuremsi_sync_duration", "Azure MSI operator sync duration"),
        &["subscription"],
    )
    .expect("Failed to create SYNC_DURATION metric - this should never happen")
});

static SYNC_TIME: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new("azuremsi_sync_time", "Azure MSI operator last sync time"),
        &["subscription"],
    )
    .expect("Failed to create SYNC_TIME metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SYNC_RESOURCES_SUCCESS.clone()))?;
    REGISTRY.register(Box::new(SYNC_RESOURCES_ERRORS.clone()))?;
    REGISTRY.register(Box::new(SYNC_DURATION.clone()))?;
    REGISTRY.register(Box::new(SYNC_TIME.clone()))?;

    Ok(())
}

pub fn record_sync_success(subscription: &str, resource: &str) {
    SYNC_RESOURCES_SUCCESS
        .with_label_values(&[subscription, resource])
        .inc();
}

pub fn record_sync_error(subscription: &str, resource: &str) {
    SYNC_RESOURCES_ERRORS
        .with_label_values(&[subscription, resource])
        .inc();
}

pub fn set_sync_duration(subscription: &str, seconds: f64) {
    SYNC_DURATION.with_label_values(&[subscription]).set(seconds);
}

pub fn set_sync_time_now(subscription: &str) {
    let unix_seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    SYNC_TIME.with_label_values(&[subscription]).set(unix_seconds);
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}
