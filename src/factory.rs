//! The factory seam between the pool engine and the backend

use async_trait::async_trait;

/// Knows how to asynchronously construct, tear down and check one resource.
///
/// The pool engine never interprets resources; everything backend-specific
/// (protocol, authentication, topology) lives behind this trait.
///
/// `create` must be safe to call again after a failure - the pool retries on
/// the next acquire. `destroy` is best-effort: the pool awaits it for orderly
/// shutdown but any problem must be swallowed (and logged) by the
/// implementation rather than returned.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produce one usable resource.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Irrevocably tear down a resource.
    async fn destroy(&self, resource: Self::Resource);

    /// Non-destructive liveness check, consulted when `test_on_borrow` is set.
    async fn validate(&self, _resource: &Self::Resource) -> bool {
        true
    }
}
