//! Contract between a job server and the process that hosts it.
//!
//! A host runtime manages a set of named services, starting them on boot
//! and stopping them on shutdown, and publishes their endpoints to a
//! discovery registry. Anything implementing [`Transport`] and
//! [`Endpointer`] can be managed that way.

use async_trait::async_trait;
use jobkit_common::AppResult;
use url::Url;

/// A named service with a start/stop lifecycle.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Service name used for registration.
    fn name(&self) -> &str;

    /// Start serving. Must not block until shutdown.
    async fn start(&self) -> AppResult<()>;

    /// Stop serving and release resources.
    async fn stop(&self) -> AppResult<()>;
}

/// A service that can report where it is reachable.
pub trait Endpointer {
    /// Endpoint advertised for discovery.
    fn endpoint(&self) -> AppResult<Url>;
}
