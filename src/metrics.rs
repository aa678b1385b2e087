//! Metrics collection and export for connection pools

use crate::pool::PoolStatus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters plus current gauges for one pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Resources handed to callers
    pub acquired: u64,

    /// Resources returned by callers
    pub released: u64,

    /// Successful factory creates
    pub created: u64,

    /// Completed factory destroys
    pub destroyed: u64,

    /// Failed factory creates
    pub create_failures: u64,

    /// Resources that failed validation on borrow
    pub validation_failures: u64,

    /// Acquires that timed out waiting
    pub acquire_timeouts: u64,

    /// Current idle resources
    pub idle: usize,

    /// Current borrowed resources
    pub borrowed: usize,

    /// Creates currently in flight
    pub pending_creates: usize,

    /// Callers currently queued
    pub waiters: usize,

    /// Borrowed as a fraction of max (0.0 to 1.0)
    pub utilization: f64,

    /// Configured maximum pool size
    pub max: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("acquired".to_string(), self.acquired.to_string());
        metrics.insert("released".to_string(), self.released.to_string());
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert("create_failures".to_string(), self.create_failures.to_string());
        metrics.insert(
            "validation_failures".to_string(),
            self.validation_failures.to_string(),
        );
        metrics.insert(
            "acquire_timeouts".to_string(),
            self.acquire_timeouts.to_string(),
        );
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("borrowed".to_string(), self.borrowed.to_string());
        metrics.insert(
            "pending_creates".to_string(),
            self.pending_creates.to_string(),
        );
        metrics.insert("waiters".to_string(), self.waiters.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max".to_string(), self.max.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus exposition format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        // Gauge metrics
        output.push_str("# HELP kvpool_connections_idle Current idle connections\n");
        output.push_str("# TYPE kvpool_connections_idle gauge\n");
        output.push_str(&format!("kvpool_connections_idle{{{}}} {}\n", labels, metrics.idle));

        output.push_str("# HELP kvpool_connections_borrowed Current borrowed connections\n");
        output.push_str("# TYPE kvpool_connections_borrowed gauge\n");
        output.push_str(&format!(
            "kvpool_connections_borrowed{{{}}} {}\n",
            labels, metrics.borrowed
        ));

        output.push_str("# HELP kvpool_connections_pending Creates in flight\n");
        output.push_str("# TYPE kvpool_connections_pending gauge\n");
        output.push_str(&format!(
            "kvpool_connections_pending{{{}}} {}\n",
            labels, metrics.pending_creates
        ));

        output.push_str("# HELP kvpool_waiters Callers queued for a connection\n");
        output.push_str("# TYPE kvpool_waiters gauge\n");
        output.push_str(&format!("kvpool_waiters{{{}}} {}\n", labels, metrics.waiters));

        output.push_str("# HELP kvpool_utilization Borrowed fraction of max\n");
        output.push_str("# TYPE kvpool_utilization gauge\n");
        output.push_str(&format!(
            "kvpool_utilization{{{}}} {:.2}\n",
            labels, metrics.utilization
        ));

        // Counter metrics
        output.push_str("# HELP kvpool_acquired_total Connections handed to callers\n");
        output.push_str("# TYPE kvpool_acquired_total counter\n");
        output.push_str(&format!("kvpool_acquired_total{{{}}} {}\n", labels, metrics.acquired));

        output.push_str("# HELP kvpool_released_total Connections returned by callers\n");
        output.push_str("# TYPE kvpool_released_total counter\n");
        output.push_str(&format!("kvpool_released_total{{{}}} {}\n", labels, metrics.released));

        output.push_str("# HELP kvpool_created_total Successful connection creates\n");
        output.push_str("# TYPE kvpool_created_total counter\n");
        output.push_str(&format!("kvpool_created_total{{{}}} {}\n", labels, metrics.created));

        output.push_str("# HELP kvpool_destroyed_total Connections torn down\n");
        output.push_str("# TYPE kvpool_destroyed_total counter\n");
        output.push_str(&format!("kvpool_destroyed_total{{{}}} {}\n", labels, metrics.destroyed));

        output.push_str("# HELP kvpool_create_failures_total Failed connection creates\n");
        output.push_str("# TYPE kvpool_create_failures_total counter\n");
        output.push_str(&format!(
            "kvpool_create_failures_total{{{}}} {}\n",
            labels, metrics.create_failures
        ));

        output.push_str("# HELP kvpool_validation_failures_total Connections failing validation\n");
        output.push_str("# TYPE kvpool_validation_failures_total counter\n");
        output.push_str(&format!(
            "kvpool_validation_failures_total{{{}}} {}\n",
            labels, metrics.validation_failures
        ));

        output.push_str("# HELP kvpool_acquire_timeouts_total Acquires that timed out\n");
        output.push_str("# TYPE kvpool_acquire_timeouts_total counter\n");
        output.push_str(&format!(
            "kvpool_acquire_timeouts_total{{{}}} {}\n",
            labels, metrics.acquire_timeouts
        ));

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
pub(crate) struct MetricsTracker {
    acquired: AtomicU64,
    released: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    create_failures: AtomicU64,
    validation_failures: AtomicU64,
    acquire_timeouts: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            create_failures: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            acquire_timeouts: AtomicU64::new(0),
        }
    }

    pub fn inc_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_create_failures(&self) {
        self.create_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_validation_failures(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_acquire_timeouts(&self) {
        self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, status: PoolStatus) -> PoolMetrics {
        let utilization = if status.max > 0 {
            status.borrowed as f64 / status.max as f64
        } else {
            0.0
        };

        PoolMetrics {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            idle: status.idle,
            borrowed: status.borrowed,
            pending_creates: status.pending_creates,
            waiters: status.waiters,
            utilization,
            max: status.max,
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metrics() -> PoolMetrics {
        let tracker = MetricsTracker::new();
        tracker.inc_acquired();
        tracker.inc_acquired();
        tracker.inc_released();
        tracker.inc_created();
        tracker.snapshot(PoolStatus {
            idle: 1,
            borrowed: 2,
            pending_creates: 0,
            waiters: 0,
            min: 1,
            max: 4,
        })
    }

    #[test]
    fn snapshot_combines_counters_and_gauges() {
        let metrics = sample_metrics();
        assert_eq!(metrics.acquired, 2);
        assert_eq!(metrics.released, 1);
        assert_eq!(metrics.created, 1);
        assert_eq!(metrics.idle, 1);
        assert_eq!(metrics.borrowed, 2);
        assert!((metrics.utilization - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn export_as_map() {
        let map = sample_metrics().export();
        assert_eq!(map["acquired"], "2");
        assert_eq!(map["borrowed"], "2");
        assert_eq!(map["utilization"], "0.50");
    }

    #[test]
    fn prometheus_export_carries_labels() {
        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "api".to_string());

        let output = MetricsExporter::export_prometheus(&sample_metrics(), "cache", Some(&tags));
        assert!(output.contains("kvpool_connections_borrowed"));
        assert!(output.contains("pool=\"cache\""));
        assert!(output.contains("service=\"api\""));
        assert!(output.contains("kvpool_acquired_total"));
    }
}
