//! The metrics-sink surface the core consumes, grounded on the
//! original `internal/scheduler.PodCollection` Prometheus gauges.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::models::WorkerGroupName;
use crate::Error;

/// Exports per-group capacity and worker-count gauges.
pub trait MetricsSink: Send + Sync {
    fn observe_capacity(&self, group: &WorkerGroupName, total: u64, remaining: u64);
    fn observe_worker_count(&self, group: &WorkerGroupName, count: u64);
}

/// A `MetricsSink` backed by the `prometheus` crate, exposed via the
/// leader's scrape endpoint on `DIAGO_PROMETHEUS_PORT`.
pub struct PrometheusSink {
    registry: Registry,
    total_capacity: GaugeVec,
    available_capacity: GaugeVec,
    worker_count: GaugeVec,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, Error> {
        let registry = Registry::new();
        let total_capacity = GaugeVec::new(
            Opts::new("diago_total_capacity", "total announced capacity per worker group"),
            &["group"],
        )
        .map_err(|e| Error::Generic(e.to_string()))?;
        let available_capacity = GaugeVec::new(
            Opts::new("diago_available_capacity", "unassigned capacity per worker group"),
            &["group"],
        )
        .map_err(|e| Error::Generic(e.to_string()))?;
        let worker_count = GaugeVec::new(
            Opts::new("diago_worker_count", "registered worker instances per worker group"),
            &["group"],
        )
        .map_err(|e| Error::Generic(e.to_string()))?;
        registry
            .register(Box::new(total_capacity.clone()))
            .map_err(|e| Error::Generic(e.to_string()))?;
        registry
            .register(Box::new(available_capacity.clone()))
            .map_err(|e| Error::Generic(e.to_string()))?;
        registry
            .register(Box::new(worker_count.clone()))
            .map_err(|e| Error::Generic(e.to_string()))?;
        Ok(PrometheusSink {
            registry,
            total_capacity,
            available_capacity,
            worker_count,
        })
    }

    /// Render the current snapshot in the Prometheus text exposition
    /// format, for the scrape endpoint to return.
    pub fn render(&self) -> Result<Vec<u8>, Error> {
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buf)
            .map_err(|e| Error::Generic(e.to_string()))?;
        Ok(buf)
    }
}

impl MetricsSink for PrometheusSink {
    fn observe_capacity(&self, group: &WorkerGroupName, total: u64, remaining: u64) {
        self.total_capacity.with_label_values(&[group.as_str()]).set(total as f64);
        self.available_capacity
            .with_label_values(&[group.as_str()])
            .set(remaining as f64);
    }

    fn observe_worker_count(&self, group: &WorkerGroupName, count: u64) {
        self.worker_count.with_label_values(&[group.as_str()]).set(count as f64);
    }
}
