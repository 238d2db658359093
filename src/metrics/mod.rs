//! Prometheus metrics module
//!
//! Recording goes through the global `metrics` recorder, so library callers
//! that never install [`RouterMetrics`] pay only for no-op macros.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Which kind of handle an acquisition produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Client,
    Cache,
}

impl ClientKind {
    pub fn label(&self) -> &'static str {
        match self {
            ClientKind::Client => "client",
            ClientKind::Cache => "cache",
        }
    }
}

/// Router metrics exporter
#[derive(Clone)]
pub struct RouterMetrics {
    handle: Arc<PrometheusHandle>,
}

impl RouterMetrics {
    /// Install the Prometheus recorder and return a handle for rendering.
    pub fn install() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        Self::register_metrics();

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "kv_router_acquisitions_total",
            Unit::Count,
            "Client handles handed out, per shard and kind"
        );
        describe_counter!(
            "kv_router_acquire_failures_total",
            Unit::Count,
            "Failed client acquisitions, per shard and error type"
        );
        describe_histogram!(
            "kv_router_acquire_duration_seconds",
            Unit::Seconds,
            "Time spent waiting on a shard pool for a client"
        );
        describe_gauge!(
            "kv_router_shards_configured",
            Unit::Count,
            "Number of shards in the registry"
        );
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Record a successful acquisition
pub fn record_acquire(address: &str, kind: ClientKind, duration: Duration) {
    counter!(
        "kv_router_acquisitions_total",
        "shard" => address.to_owned(),
        "kind" => kind.label()
    )
    .increment(1);

    histogram!(
        "kv_router_acquire_duration_seconds",
        "shard" => address.to_owned()
    )
    .record(duration.as_secs_f64());
}

/// Record a failed acquisition
pub fn record_acquire_failure(address: &str, error_type: &'static str) {
    counter!(
        "kv_router_acquire_failures_total",
        "shard" => address.to_owned(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Set configured shard count
pub fn set_shards_configured(count: usize) {
    gauge!("kv_router_shards_configured").set(count as f64);
}
