//! Circuit breaker guarding factory creates
//!
//! When the backend is unreachable every acquire would otherwise burn a full
//! connect attempt (and its timeout). The breaker counts consecutive create
//! failures and, once open, makes acquires fail fast with
//! [`CircuitOpen`](crate::PoolError::CircuitOpen) until a cooldown elapses.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker state
///
/// # Examples
///
/// ```
/// use kvpool::{CircuitBreaker, CircuitBreakerState};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
/// assert_eq!(breaker.state(), CircuitBreakerState::Closed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Circuit is closed - creates proceed normally
    Closed,

    /// Circuit is open - acquires fail fast
    Open,

    /// Circuit is half-open - probing whether the backend recovered
    HalfOpen,
}

/// Counts consecutive connection failures and fails fast once a threshold
/// is crossed.
///
/// # Examples
///
/// ```
/// use kvpool::CircuitBreaker;
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
///
/// breaker.record_failure();
/// breaker.record_failure();
/// breaker.record_failure();
///
/// assert!(!breaker.allow_request());
/// ```
pub struct CircuitBreaker {
    state: Mutex<CircuitBreakerState>,
    failure_count: AtomicUsize,
    success_count: AtomicUsize,
    failure_threshold: usize,
    cooldown: Duration,
    last_failure_time: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(CircuitBreakerState::Closed),
            failure_count: AtomicUsize::new(0),
            success_count: AtomicUsize::new(0),
            failure_threshold,
            cooldown,
            last_failure_time: Mutex::new(None),
        }
    }

    /// Get the current state
    pub fn state(&self) -> CircuitBreakerState {
        *self.state.lock()
    }

    /// Whether an acquire may proceed right now
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                let last_failure = *self.last_failure_time.lock();
                if let Some(time) = last_failure
                    && time.elapsed() > self.cooldown
                {
                    self.transition_to_half_open();
                    return true;
                }
                false
            }
            CircuitBreakerState::HalfOpen => true,
        }
    }

    /// Record a successful create
    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);

        if self.state() == CircuitBreakerState::HalfOpen {
            // a few successful probes close the circuit again
            if self.success_count.load(Ordering::Relaxed) >= 3 {
                self.transition_to_closed();
            }
        }
    }

    /// Record a failed create
    pub fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure_time.lock() = Some(Instant::now());

        match self.state() {
            CircuitBreakerState::Closed => {
                if count >= self.failure_threshold {
                    self.transition_to_open();
                }
            }
            CircuitBreakerState::HalfOpen => {
                // any failure while probing reopens the circuit
                self.transition_to_open();
            }
            CircuitBreakerState::Open => {}
        }
    }

    fn transition_to_open(&self) {
        *self.state.lock() = CircuitBreakerState::Open;
    }

    fn transition_to_half_open(&self) {
        *self.state.lock() = CircuitBreakerState::HalfOpen;
        self.success_count.store(0, Ordering::Relaxed);
    }

    fn transition_to_closed(&self) {
        *self.state.lock() = CircuitBreakerState::Closed;
        self.failure_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
    }

    /// Reset the circuit breaker
    pub fn reset(&self) {
        self.transition_to_closed();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}
