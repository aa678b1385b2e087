//! Health assessment for connection pools

use crate::pool::PoolStatus;

/// Health assessment derived from the pool's current counters.
///
/// # Examples
///
/// ```no_run
/// # use kvpool::{Pool, PoolOptions, ResourceFactory};
/// # fn demo<F: ResourceFactory>(pool: &Pool<F>) {
/// let health = pool.health();
/// if !health.is_healthy() {
///     for warning in &health.warnings {
///         eprintln!("pool warning: {warning}");
///     }
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool looks healthy
    pub is_healthy: bool,

    /// Borrowed as a fraction of max (0.0 to 1.0)
    pub utilization: f64,

    /// Idle connections available right now
    pub idle: usize,

    /// Connections currently checked out
    pub borrowed: usize,

    /// Callers queued for a connection
    pub waiters: usize,

    /// Configured maximum
    pub max: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub(crate) fn from_status(status: PoolStatus) -> Self {
        let utilization = if status.max > 0 {
            status.borrowed as f64 / status.max as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if utilization > 0.9 {
            warnings.push(format!("high utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if status.waiters > 0 && status.size() >= status.max {
            warnings.push(format!(
                "{} callers waiting with the pool exhausted",
                status.waiters
            ));
            is_healthy = false;
        }

        if status.idle == 0 && status.max > 0 && status.pending_creates == 0 {
            warnings.push("no idle connections available".to_string());
        }

        Self {
            is_healthy,
            utilization,
            idle: status.idle,
            borrowed: status.borrowed,
            waiters: status.waiters,
            max: status.max,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
