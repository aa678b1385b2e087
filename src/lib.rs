//! # kvpool
//!
//! Bounded async connection pooling for key-value store clients, with a
//! generic resource pool engine underneath.
//!
//! ## Features
//!
//! - Bounded pool with a minimum kept warm and a hard maximum
//! - Priority-aware waiter queue with per-acquire timeouts
//! - Automatic return of connections via RAII (Drop trait)
//! - Validation on borrow with transparent replacement
//! - Idle eviction down to the configured minimum
//! - Graceful shutdown: drain, clear, end
//! - Health monitoring, metrics and Prometheus export
//! - Circuit breaker guarding connection establishment
//!
//! ## Quick Start
//!
//! Bind a client type to one of the facades:
//!
//! ```no_run
//! use kvpool::{KvPool, KvPoolOptions, NodeConfig, KvClient, ConnectError};
//!
//! # async fn demo<C: KvClient<Config = NodeConfig>>() -> Result<(), kvpool::PoolError<ConnectError>> {
//! let pool: KvPool<C> = KvPool::new(KvPoolOptions {
//!     connection: NodeConfig::new("127.0.0.1", 6379),
//!     ..Default::default()
//! });
//!
//! let client = pool.get_connection().await?;
//! // use the client, then hand it back
//! pool.release(client)?;
//!
//! pool.end().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Or pool any resource directly through [`Pool`] and a [`ResourceFactory`].

mod circuit_breaker;
mod cluster;
mod config;
mod connection;
mod errors;
mod factory;
mod health;
mod logger;
mod metrics;
mod pool;
mod single;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use cluster::{
    ClusterConfig, ClusterPoolOptions, KvClusterPool, NodeAddr, PooledClusterClient,
};
pub use config::PoolOptions;
pub use connection::{
    ClientFactory, ConnectError, Handshake, HandshakeDriver, KvClient, handshake,
};
pub use errors::{PoolError, PoolResult};
pub use factory::ResourceFactory;
pub use health::HealthStatus;
pub use logger::{Logger, QuietLogger, TracingLogger};
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::{Pool, PoolStatus, Pooled};
pub use single::{KvPool, KvPoolOptions, NodeConfig, PooledClient};
