//! Single-node pool facade
//!
//! Thin composition glue: binds a concrete client type connecting to one
//! backend node to the generic pool engine, re-exposing its operations under
//! the names callers of a connection pool expect.

use crate::config::PoolOptions;
use crate::connection::{ClientFactory, ConnectError, KvClient};
use crate::errors::PoolResult;
use crate::health::HealthStatus;
use crate::logger::{Logger, default_logger};
use crate::metrics::PoolMetrics;
use crate::pool::{Pool, Pooled, PoolStatus};
use std::sync::Arc;

/// Address, credentials and namespace for one backend node.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeConfig {
    /// Backend host
    pub host: String,

    /// Backend port
    pub port: u16,

    /// Optional username
    pub username: Option<String>,

    /// Optional password
    pub password: Option<String>,

    /// Logical database index
    pub db: u32,

    /// Prefix applied to every key by the client
    pub key_prefix: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            db: 0,
            key_prefix: None,
        }
    }
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
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

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

/// Options for a single-node pool.
#[derive(Default)]
pub struct KvPoolOptions {
    /// Connection parameters, opaque to the pool engine
    pub connection: NodeConfig,

    /// Pool sizing and timing
    pub pool: PoolOptions,

    /// Observability sink; defaults to the `tracing`-backed logger
    pub logger: Option<Arc<dyn Logger>>,
}

/// A borrowed single-node client.
pub type PooledClient<C> = Pooled<ClientFactory<C>>;

/// A pool of connections to one backend node.
///
/// # Examples
///
/// ```no_run
/// # use kvpool::{KvPool, KvPoolOptions, NodeConfig, KvClient, ConnectError};
/// # async fn demo<C: KvClient<Config = NodeConfig>>() -> Result<(), kvpool::PoolError<ConnectError>> {
/// let pool: KvPool<C> = KvPool::new(KvPoolOptions {
///     connection: NodeConfig::new("127.0.0.1", 6379),
///     ..Default::default()
/// });
///
/// let client = pool.get_connection().await?;
/// // issue commands through `client`, then hand it back
/// pool.release(client)?;
///
/// pool.end().await?;
/// # Ok(())
/// # }
/// ```
pub struct KvPool<C: KvClient<Config = NodeConfig>> {
    pool: Pool<ClientFactory<C>>,
    logger: Arc<dyn Logger>,
}

impl<C: KvClient<Config = NodeConfig>> KvPool<C> {
    /// Create the pool and start topping it up to its configured minimum.
    pub fn new(options: KvPoolOptions) -> Self {
        let logger = options.logger.unwrap_or_else(default_logger);
        let factory = ClientFactory::new(options.connection, Arc::clone(&logger));
        let pool = Pool::with_logger(factory, options.pool, Arc::clone(&logger));
        Self { pool, logger }
    }

    /// Get a connection from the pool.
    pub async fn get_connection(&self) -> PoolResult<PooledClient<C>, ConnectError> {
        self.pool.acquire().await
    }

    /// Get a connection, jumping ahead of lower-priority waiters.
    pub async fn get_connection_priority(
        &self,
        priority: i32,
    ) -> PoolResult<PooledClient<C>, ConnectError> {
        self.pool.acquire_priority(priority).await
    }

    /// Return a connection to the pool.
    pub fn release(&self, client: PooledClient<C>) -> PoolResult<(), ConnectError> {
        self.pool.release(client)
    }

    /// Close a connection instead of returning it.
    pub async fn disconnect(&self, client: PooledClient<C>) -> PoolResult<(), ConnectError> {
        self.pool.destroy(client).await
    }

    /// Close all connections: drain, then destroy everything idle.
    pub async fn end(&self) -> PoolResult<(), ConnectError> {
        self.pool.end().await?;
        self.logger.info("disconnected all connections to the backend node");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::HandshakeDriver;
    use crate::logger::CapturingLogger;
    use async_trait::async_trait;

    struct LoopbackClient {
        port: u16,
    }

    #[async_trait]
    impl KvClient for LoopbackClient {
        type Config = NodeConfig;

        fn connect(config: &NodeConfig, handshake: HandshakeDriver) -> Self {
            if config.port == 0 {
                handshake.fail(ConnectError::new("invalid port"));
            } else {
                handshake.ready();
            }
            Self { port: config.port }
        }

        async fn close(self) {}
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn tops_up_to_default_min() {
        let pool: KvPool<LoopbackClient> = KvPool::new(KvPoolOptions {
            logger: Some(Arc::new(crate::logger::QuietLogger)),
            ..Default::default()
        });
        settle().await;

        let status = pool.status();
        assert_eq!(status.min, 2);
        assert_eq!(status.max, 10);
        assert_eq!(status.idle, 2);
    }

    #[tokio::test]
    async fn get_release_round_trip() {
        let pool: KvPool<LoopbackClient> = KvPool::new(KvPoolOptions {
            connection: NodeConfig::new("kv.internal", 7000),
            pool: PoolOptions::new().with_bounds(0, 2),
            logger: Some(Arc::new(crate::logger::QuietLogger)),
        });

        let client = pool.get_connection().await.unwrap();
        assert_eq!(client.port, 7000);
        pool.release(client).unwrap();
        settle().await;
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn connect_failure_reaches_the_caller() {
        let pool: KvPool<LoopbackClient> = KvPool::new(KvPoolOptions {
            connection: NodeConfig::new("kv.internal", 0),
            pool: PoolOptions::new().with_bounds(0, 2),
            logger: Some(Arc::new(crate::logger::QuietLogger)),
        });

        let err = pool.get_connection().await.unwrap_err();
        assert!(matches!(err, crate::PoolError::FactoryCreate(_)));
    }

    #[tokio::test]
    async fn end_disconnects_and_logs() {
        let logger = Arc::new(CapturingLogger::default());
        let pool: KvPool<LoopbackClient> = KvPool::new(KvPoolOptions {
            pool: PoolOptions::new().with_bounds(1, 2),
            logger: Some(logger.clone()),
            ..Default::default()
        });
        settle().await;

        pool.end().await.unwrap();
        let messages = logger.messages.lock();
        assert!(messages.iter().any(|(level, message)| {
            *level == "info" && message.contains("disconnected all")
        }));

        drop(messages);
        let err = pool.get_connection().await.unwrap_err();
        assert!(matches!(err, crate::PoolError::Shutdown));
    }
}
