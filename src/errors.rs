//! Error types for the connection pool

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by pool operations.
///
/// Generic over the factory's error type `E` so backend connection failures
/// reach the caller without boxing.
#[derive(Error, Debug)]
pub enum PoolError<E> {
    /// The factory failed to create a resource. Delivered only to the caller
    /// or waiter whose demand triggered (or was waiting on) the failed create.
    #[error("failed to create pooled resource")]
    FactoryCreate(#[source] E),

    /// The resource is not currently tracked as borrowed by this pool.
    #[error("resource is not borrowed from this pool")]
    InvalidResource,

    /// The caller waited longer than the configured acquire timeout.
    #[error("timed out after {0:?} waiting for a pooled resource")]
    AcquireTimeout(Duration),

    /// Validation on borrow kept failing and the retry budget ran out.
    #[error("resource validation failed after {attempts} attempts")]
    ValidationFailed {
        /// Number of validate-destroy-recreate rounds performed.
        attempts: u32,
    },

    /// The pool is draining and no longer hands out resources.
    #[error("pool is draining")]
    Draining,

    /// The pool has been cleared and accepts no further operations.
    #[error("pool has been shut down")]
    Shutdown,

    /// The circuit breaker is open - the backend is considered unavailable.
    #[error("circuit breaker is open - too many connection failures")]
    CircuitOpen,
}

pub type PoolResult<T, E> = Result<T, PoolError<E>>;
