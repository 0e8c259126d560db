use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// One source-attempt observation (spec §4.7: `source_id`, `outcome`,
/// `duration_ms`, `bytes_read`, `error_kind?`).
#[derive(Debug, Clone)]
pub struct Sample {
    pub endpoint: String,
    pub duration_ms: f64,
    pub success: bool,
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

const GLOBAL_RING_CAPACITY: usize = 1000;
const PER_ENDPOINT_RING_CAPACITY: usize = 100;

/// Rolling response-time tracker with per-endpoint percentiles and a
/// structured alert when P95 crosses a configured threshold.
pub struct PerformanceMonitor {
    target_ms: f64,
    alert_ms: f64,
    global: Mutex<VecDeque<Sample>>,
    per_endpoint: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl PerformanceMonitor {
    pub fn new(target_ms: f64, alert_ms: f64) -> Self {
        Self {
            target_ms,
            alert_ms,
            global: Mutex::new(VecDeque::with_capacity(GLOBAL_RING_CAPACITY)),
            per_endpoint: Mutex::new(HashMap::new()),
        }
    }

    /// Records one attempt and fires a structured alert if its duration
    /// exceeds the alert threshold, or if it failed outright.
    pub fn record(&self, sample: Sample) {
        {
            let mut global = self.global.lock().expect("performance monitor mutex poisoned");
            if global.len() == GLOBAL_RING_CAPACITY {
                global.pop_front();
            }
            global.push_back(sample.clone());
        }

        let recent_avg = {
            let mut by_endpoint = self.per_endpoint.lock().expect("performance monitor mutex poisoned");
            let ring = by_endpoint.entry(sample.endpoint.clone()).or_default();
            if ring.len() == PER_ENDPOINT_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(sample.duration_ms);
            let last_10: Vec<f64> = ring.iter().rev().take(10).copied().collect();
            if last_10.is_empty() { None } else { Some(last_10.iter().sum::<f64>() / last_10.len() as f64) }
        };

        if sample.duration_ms > self.alert_ms || !sample.success {
            tracing::warn!(
                endpoint = %sample.endpoint,
                duration_ms = sample.duration_ms,
                success = sample.success,
                error_kind = sample.error_kind.as_deref().unwrap_or(""),
                target_ms = self.target_ms,
                alert_ms = self.alert_ms,
                recent_avg_ms = recent_avg,
                "performance alert"
            );
        }
    }

    pub fn percentiles(&self, endpoint: &str) -> Option<Percentiles> {
        let by_endpoint = self.per_endpoint.lock().expect("performance monitor mutex poisoned");
        let ring = by_endpoint.get(endpoint)?;
        if ring.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = ring.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let at = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(sorted.len() - 1)];
        Some(Percentiles { p50: at(0.5), p95: at(0.95), p99: at(0.99) })
    }
}

/// Installs the Prometheus recorder and process-wide exporter, mirroring
/// the teacher's metrics bootstrap but without the HTTP surface (the
/// upward query interface and its server are out of scope here).
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("elevation_sample_duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .expect("failed to set buckets for elevation_sample_duration_seconds")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Pre-registers every metric this crate emits at zero, so dashboards and
/// alerts see the series exist even before the first real event.
pub fn initialize_metrics() {
    metrics::counter!("elevation_tier_attempts_total").absolute(0);
    metrics::counter!("elevation_tier_hits_total").absolute(0);
    metrics::counter!("elevation_tier_misses_total").absolute(0);
    metrics::counter!("elevation_tier_errors_total").absolute(0);
    metrics::counter!("elevation_requests_overloaded_total").absolute(0);
    metrics::counter!("elevation_requests_invalid_total").absolute(0);
    metrics::gauge!("elevation_dataset_cache_entries").set(0.0);
    metrics::gauge!("elevation_inflight_object_reads").set(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_are_sorted_quantiles() {
        let monitor = PerformanceMonitor::new(100.0, 500.0);
        for ms in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0] {
            monitor.record(Sample { endpoint: "point".into(), duration_ms: ms, success: true, error_kind: None });
        }
        let p = monitor.percentiles("point").unwrap();
        assert_eq!(p.p50, 60.0);
        assert!(p.p95 >= p.p50);
    }

    #[test]
    fn unknown_endpoint_has_no_percentiles() {
        let monitor = PerformanceMonitor::new(100.0, 500.0);
        assert!(monitor.percentiles("nope").is_none());
    }
}
