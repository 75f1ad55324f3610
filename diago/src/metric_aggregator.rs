//! Online per-job reduction of streamed `Metrics` samples (C8).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use diago_proto::Metrics as WireMetrics;

/// The stable, persisted shape of one job's aggregated metrics.
///
/// spec.md §9 leaves the storage format open ("the source serialized
/// it as an opaque embedded object"); this is the resolved schema
/// (SPEC_FULL.md §9).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub total_requests: u64,
    pub success_count: u64,
    pub latency_sum_millis: u64,
    pub latency_min_millis: Option<u64>,
    pub latency_max_millis: Option<u64>,
    pub mean_latency_millis: f64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub status_counts: HashMap<u16, u64>,
    pub errors: HashSet<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub closed: bool,
}

/// A live accumulator for one job's `Metrics` stream. The funnel's
/// per-job consumer task owns one of these; closing it finalizes
/// derived means and rejects further `add` calls.
#[derive(Debug, Clone)]
pub struct MetricAggregator {
    data: AggregatedMetrics,
}

impl MetricAggregator {
    pub fn new() -> Self {
        MetricAggregator {
            data: AggregatedMetrics::default(),
        }
    }

    /// Fold one observed sample in. A no-op once `close` has run.
    pub fn add(&mut self, sample: &WireMetrics) {
        if self.data.closed {
            return;
        }
        self.data.total_requests += 1;
        self.data.latency_sum_millis += sample.latency_millis;
        self.data.latency_min_millis = Some(
            self.data
                .latency_min_millis
                .map_or(sample.latency_millis, |min| min.min(sample.latency_millis)),
        );
        self.data.latency_max_millis = Some(
            self.data
                .latency_max_millis
                .map_or(sample.latency_millis, |max| max.max(sample.latency_millis)),
        );
        self.data.bytes_in += sample.bytes_in;
        self.data.bytes_out += sample.bytes_out;
        *self.data.status_counts.entry(sample.code as u16).or_insert(0) += 1;
        let is_success = sample.code < 400 && sample.error.is_none();
        if is_success {
            self.data.success_count += 1;
        }
        if let Some(error) = &sample.error {
            self.data.errors.insert(error.clone());
        }
        let seen = DateTime::from_timestamp_millis(sample.timestamp_millis).unwrap_or_else(Utc::now);
        self.data.first_seen = Some(self.data.first_seen.map_or(seen, |first| first.min(seen)));
        self.data.last_seen = Some(self.data.last_seen.map_or(seen, |last| last.max(seen)));
    }

    /// Finalize derived means and freeze this aggregator.
    pub fn close(&mut self) {
        if self.data.closed {
            return;
        }
        if self.data.total_requests > 0 {
            self.data.mean_latency_millis =
                self.data.latency_sum_millis as f64 / self.data.total_requests as f64;
        }
        self.data.closed = true;
    }

    pub fn snapshot(&self) -> AggregatedMetrics {
        self.data.clone()
    }
}

impl Default for MetricAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(code: u32, latency: u64, error: Option<&str>) -> WireMetrics {
        WireMetrics {
            job_id: "job-0".into(),
            code,
            bytes_in: 100,
            bytes_out: 50,
            latency_millis: latency,
            error: error.map(str::to_owned),
            timestamp_millis: 0,
        }
    }

    #[test]
    fn tracks_min_max_and_mean_latency() {
        let mut agg = MetricAggregator::new();
        agg.add(&sample(200, 10, None));
        agg.add(&sample(200, 30, None));
        agg.add(&sample(200, 20, None));
        agg.close();
        let snap = agg.snapshot();
        assert_eq!(snap.latency_min_millis, Some(10));
        assert_eq!(snap.latency_max_millis, Some(30));
        assert_eq!(snap.mean_latency_millis, 20.0);
        assert_eq!(snap.total_requests, 3);
    }

    #[test]
    fn counts_failures_by_status_and_error_message() {
        let mut agg = MetricAggregator::new();
        agg.add(&sample(200, 5, None));
        agg.add(&sample(500, 5, Some("boom")));
        agg.add(&sample(500, 5, Some("boom")));
        let snap = agg.snapshot();
        assert_eq!(snap.success_count, 1);
        assert_eq!(snap.status_counts.get(&500), Some(&2));
        assert_eq!(snap.errors.len(), 1);
    }

    #[test]
    fn close_prevents_further_writes() {
        let mut agg = MetricAggregator::new();
        agg.add(&sample(200, 10, None));
        agg.close();
        agg.add(&sample(200, 999, None));
        assert_eq!(agg.snapshot().total_requests, 1);
    }
}
