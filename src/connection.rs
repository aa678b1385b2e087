//! Connection establishment seam shared by both pool facades
//!
//! A backend client typically signals readiness and failure through events.
//! [`handshake`] turns that into a single-resolution pair: the client-side
//! [`HandshakeDriver`] can fire exactly one of `ready`/`fail` (its methods
//! consume it), and the pool-side [`Handshake`] races the two signals,
//! dropping the losing channel so no subscription outlives the outcome.

use crate::factory::ResourceFactory;
use crate::logger::Logger;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Failure to establish (or cleanly finish establishing) a connection.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConnectError {
    message: String,
}

impl ConnectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The connection attempt went away without reporting either outcome.
    pub(crate) fn aborted() -> Self {
        Self::new("connection attempt aborted before completing")
    }
}

/// Client-side half of the readiness race. Consumed by whichever of the two
/// outcomes happens first.
pub struct HandshakeDriver {
    ready: oneshot::Sender<()>,
    failed: oneshot::Sender<ConnectError>,
}

impl HandshakeDriver {
    /// Signal that the connection is established and usable.
    pub fn ready(self) {
        let _ = self.ready.send(());
    }

    /// Signal that establishing the connection failed.
    pub fn fail(self, error: ConnectError) {
        let _ = self.failed.send(error);
    }
}

/// Pool-side half of the readiness race.
pub struct Handshake {
    ready: oneshot::Receiver<()>,
    failed: oneshot::Receiver<ConnectError>,
}

impl Handshake {
    /// Wait for the first of ready/failed; the losing signal is dropped.
    pub async fn wait(mut self) -> Result<(), ConnectError> {
        tokio::select! {
            outcome = &mut self.ready => match outcome {
                Ok(()) => Ok(()),
                Err(_) => match self.failed.try_recv() {
                    Ok(error) => Err(error),
                    Err(_) => Err(ConnectError::aborted()),
                },
            },
            outcome = &mut self.failed => match outcome {
                Ok(error) => Err(error),
                Err(_) => match self.ready.try_recv() {
                    Ok(()) => Ok(()),
                    Err(_) => Err(ConnectError::aborted()),
                },
            },
        }
    }
}

/// Create a linked driver/handshake pair for one connection attempt.
pub fn handshake() -> (HandshakeDriver, Handshake) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (failed_tx, failed_rx) = oneshot::channel();
    (
        HandshakeDriver {
            ready: ready_tx,
            failed: failed_tx,
        },
        Handshake {
            ready: ready_rx,
            failed: failed_rx,
        },
    )
}

/// What the pool needs from a key-value store client. Everything else about
/// the backend (protocol, commands, topology) stays opaque.
#[async_trait]
pub trait KvClient: Send + Sync + Sized + 'static {
    /// Connection parameters: a single node address or a cluster's startup
    /// nodes, credentials and so on.
    type Config: Clone + Send + Sync + 'static;

    /// Start connecting. The implementation fires the driver once the
    /// connection is ready or once establishing it failed.
    fn connect(config: &Self::Config, handshake: HandshakeDriver) -> Self;

    /// Close the connection. Resolves once no further reconnection will be
    /// attempted.
    async fn close(self);

    /// Whether the connection still looks usable.
    fn is_open(&self) -> bool {
        true
    }
}

/// The one [`ResourceFactory`] both facades bind to their pool engine.
pub struct ClientFactory<C: KvClient> {
    config: C::Config,
    logger: Arc<dyn Logger>,
}

impl<C: KvClient> ClientFactory<C> {
    pub fn new(config: C::Config, logger: Arc<dyn Logger>) -> Self {
        Self { config, logger }
    }
}

#[async_trait]
impl<C: KvClient> ResourceFactory for ClientFactory<C> {
    type Resource = C;
    type Error = ConnectError;

    async fn create(&self) -> Result<C, ConnectError> {
        let (driver, handshake) = handshake();
        let client = C::connect(&self.config, driver);
        match handshake.wait().await {
            Ok(()) => {
                self.logger.info("connection to backend established");
                Ok(client)
            }
            Err(error) => {
                self.logger
                    .error(&format!("failed to create backend connection: {error}"));
                client.close().await;
                Err(error)
            }
        }
    }

    async fn destroy(&self, client: C) {
        client.close().await;
        self.logger
            .info("connection closed; no more reconnections will be made");
    }

    async fn validate(&self, client: &C) -> bool {
        client.is_open()
    }
}
