//! Clustered pool facade
//!
//! Same shape as the single-node facade, but each pooled client speaks to a
//! cluster: the configuration carries the startup nodes used for topology
//! discovery, and the client handles slot routing internally. The pool treats
//! the whole cluster connection as one resource.

use crate::config::PoolOptions;
use crate::connection::{ClientFactory, ConnectError, KvClient};
use crate::errors::PoolResult;
use crate::health::HealthStatus;
use crate::logger::{Logger, default_logger};
use crate::metrics::PoolMetrics;
use crate::pool::{Pool, Pooled, PoolStatus};
use std::sync::Arc;

/// One startup node of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Cluster connection parameters.
///
/// Only a subset of the topology needs to be listed; the client discovers the
/// rest from whichever startup node answers first.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterConfig {
    /// Seed nodes for topology discovery
    pub startup_nodes: Vec<NodeAddr>,

    /// Optional username
    pub username: Option<String>,

    /// Optional password
    pub password: Option<String>,

    /// Prefix applied to every key by the client
    pub key_prefix: Option<String>,
}

impl ClusterConfig {
    pub fn new(startup_nodes: Vec<NodeAddr>) -> Self {
        Self {
            startup_nodes,
            ..Self::default()
        }
    }

    pub fn with_auth(
        mut self,
        username: Option<impl Into<String>>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.map(Into::into);
        self.password = Some(password.into());
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

/// Options for a clustered pool.
#[derive(Default)]
pub struct ClusterPoolOptions {
    /// Cluster parameters, opaque to the pool engine
    pub cluster: ClusterConfig,

    /// Pool sizing and timing
    pub pool: PoolOptions,

    /// Observability sink; defaults to the `tracing`-backed logger
    pub logger: Option<Arc<dyn Logger>>,
}

/// A borrowed cluster client.
pub type PooledClusterClient<C> = Pooled<ClientFactory<C>>;

/// A pool of cluster clients.
///
/// # Examples
///
/// ```no_run
/// # use kvpool::{KvClusterPool, ClusterPoolOptions, ClusterConfig, NodeAddr, KvClient, ConnectError};
/// # async fn demo<C: KvClient<Config = ClusterConfig>>() -> Result<(), kvpool::PoolError<ConnectError>> {
/// let pool: KvClusterPool<C> = KvClusterPool::new(ClusterPoolOptions {
///     cluster: ClusterConfig::new(vec![
///         NodeAddr::new("10.0.0.1", 6379),
///         NodeAddr::new("10.0.0.2", 6379),
///     ]),
///     ..Default::default()
/// });
///
/// let client = pool.get_connection().await?;
/// pool.release(client)?;
/// pool.end().await?;
/// # Ok(())
/// # }
/// ```
pub struct KvClusterPool<C: KvClient<Config = ClusterConfig>> {
    pool: Pool<ClientFactory<C>>,
    logger: Arc<dyn Logger>,
}

impl<C: KvClient<Config = ClusterConfig>> KvClusterPool<C> {
    /// Create the pool and start topping it up to its configured minimum.
    pub fn new(options: ClusterPoolOptions) -> Self {
        let logger = options.logger.unwrap_or_else(default_logger);
        let factory = ClientFactory::new(options.cluster, Arc::clone(&logger));
        let pool = Pool::with_logger(factory, options.pool, Arc::clone(&logger));
        Self { pool, logger }
    }

    /// Get a cluster client from the pool.
    pub async fn get_connection(&self) -> PoolResult<PooledClusterClient<C>, ConnectError> {
        self.pool.acquire().await
    }

    /// Get a cluster client, jumping ahead of lower-priority waiters.
    pub async fn get_connection_priority(
        &self,
        priority: i32,
    ) -> PoolResult<PooledClusterClient<C>, ConnectError> {
        self.pool.acquire_priority(priority).await
    }

    /// Return a cluster client to the pool.
    pub fn release(&self, client: PooledClusterClient<C>) -> PoolResult<(), ConnectError> {
        self.pool.release(client)
    }

    /// Close a cluster client instead of returning it.
    pub async fn disconnect(
        &self,
        client: PooledClusterClient<C>,
    ) -> PoolResult<(), ConnectError> {
        self.pool.destroy(client).await
    }

    /// Close all cluster clients: drain, then destroy everything idle.
    pub async fn end(&self) -> PoolResult<(), ConnectError> {
        self.pool.end().await?;
        self.logger.info("disconnected all connections to the cluster");
        Ok(())
    }

    /// Current bookkeeping counters.
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Lifetime counters plus current gauges.
    pub fn metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }

    /// Health assessment derived from the current status.
    pub fn health(&self) -> HealthStatus {
        self.pool.health()
    }
}
