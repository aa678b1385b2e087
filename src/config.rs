//! Pool configuration options

use std::time::Duration;

/// Configuration for pool behavior
///
/// # Examples
///
/// ```
/// use kvpool::PoolOptions;
/// use std::time::Duration;
///
/// let options = PoolOptions::new()
///     .with_bounds(2, 10)
///     .with_acquire_timeout(Duration::from_secs(5))
///     .with_idle_timeout(Duration::from_secs(300));
///
/// assert_eq!(options.min, 2);
/// assert_eq!(options.max, 10);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolOptions {
    /// Minimum number of resources the pool keeps alive (top-up target)
    pub min: usize,

    /// Maximum number of resources, counting in-flight creations
    pub max: usize,

    /// How long a caller may wait for a resource before
    /// [`AcquireTimeout`](crate::PoolError::AcquireTimeout)
    pub acquire_timeout: Option<Duration>,

    /// Destroy idle resources older than this (soft idle eviction)
    pub idle_timeout: Option<Duration>,

    /// Cadence of the background eviction sweep
    pub eviction_interval: Duration,

    /// Whether to validate resources taken from the idle set before handing
    /// them out
    pub test_on_borrow: bool,

    /// Bounded retry budget for the validate-destroy-recreate cycle
    pub max_validation_attempts: u32,

    /// Enable circuit breaker protection against a dead backend
    pub enable_circuit_breaker: bool,

    /// Consecutive create failures before the circuit opens
    pub circuit_breaker_threshold: usize,

    /// How long the circuit stays open before probing again
    pub circuit_breaker_cooldown: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min: 2,
            max: 10,
            acquire_timeout: Some(Duration::from_secs(30)),
            idle_timeout: None,
            eviction_interval: Duration::from_secs(30),
            test_on_borrow: false,
            max_validation_attempts: 3,
            enable_circuit_breaker: false,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

impl PoolOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum and maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use kvpool::PoolOptions;
    ///
    /// let options = PoolOptions::new().with_bounds(0, 4);
    ///
    /// assert_eq!(options.min, 0);
    /// assert_eq!(options.max, 4);
    /// ```
    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Wait indefinitely for a resource
    pub fn without_acquire_timeout(mut self) -> Self {
        self.acquire_timeout = None;
        self
    }

    /// Set the idle timeout after which resources are evicted
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set how often the eviction sweep runs
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Validate resources on borrow, bounded by `attempts` recreation rounds
    pub fn with_test_on_borrow(mut self, attempts: u32) -> Self {
        self.test_on_borrow = true;
        self.max_validation_attempts = attempts;
        self
    }

    /// Enable circuit breaker
    ///
    /// # Examples
    ///
    /// ```
    /// use kvpool::PoolOptions;
    /// use std::time::Duration;
    ///
    /// let options = PoolOptions::new()
    ///     .with_circuit_breaker(5, Duration::from_secs(60));
    ///
    /// assert!(options.enable_circuit_breaker);
    /// assert_eq!(options.circuit_breaker_threshold, 5);
    /// ```
    pub fn with_circuit_breaker(mut self, threshold: usize, cooldown: Duration) -> Self {
        self.enable_circuit_breaker = true;
        self.circuit_breaker_threshold = threshold;
        self.circuit_breaker_cooldown = cooldown;
        self
    }
}
