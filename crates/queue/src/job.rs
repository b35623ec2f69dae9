//! Job capability shared by every broker, and the values passed to callbacks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

/// Operations a job type exposes so a [`Server`](crate::Server) can host it.
///
/// `consume` and `produce` each run one worker loop and return when that
/// worker is done; the server spawns as many of each as the job asks for.
#[async_trait]
pub trait JobServer: Send + Sync {
    /// Name used in log fields.
    fn name(&self) -> &str {
        "job"
    }

    /// Number of consumer workers to spawn.
    fn consumer_num(&self) -> usize;

    /// Number of producer workers to spawn.
    fn producer_num(&self) -> usize;

    /// Run one consumer worker until the queue is closed and drained.
    async fn consume(&self);

    /// Run one producer worker until shutdown begins.
    async fn produce(&self);

    /// Stop production and wait until every worker has exited.
    async fn close(&self);
}

/// Broker lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Producers keep fetching.
    Running,
    /// Shutdown requested; producers stop, consumers drain.
    Draining,
    /// Every worker has exited.
    Stopped,
}

impl fmt::Display for BrokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Which pool a worker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Fetches batches and fills the queue.
    Producer,
    /// Drains the queue into the consumer callback.
    Consumer,
}

/// Per-call context handed to producer and consumer callbacks.
///
/// A fresh context is built for every call. It carries no deadline and is
/// never cancelled by the broker; callbacks that want to wind down early may
/// watch [`JobContext::is_draining`].
#[derive(Debug, Clone)]
pub struct JobContext {
    broker: Arc<str>,
    role: WorkerRole,
    worker: usize,
    state: watch::Receiver<BrokerState>,
}

impl JobContext {
    pub(crate) const fn new(
        broker: Arc<str>,
        role: WorkerRole,
        worker: usize,
        state: watch::Receiver<BrokerState>,
    ) -> Self {
        Self {
            broker,
            role,
            worker,
            state,
        }
    }

    /// Name of the broker running this call.
    #[must_use]
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Pool of the calling worker.
    #[must_use]
    pub const fn role(&self) -> WorkerRole {
        self.role
    }

    /// Index of the calling worker within its pool.
    #[must_use]
    pub const fn worker(&self) -> usize {
        self.worker
    }

    /// Whether the broker has left the running state.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        *self.state.borrow() != BrokerState::Running
    }

    /// Wait until the broker leaves the running state.
    pub async fn draining(&mut self) {
        // The sender lives as long as the broker, so an error means it is gone.
        let _ = self
            .state
            .wait_for(|state| *state != BrokerState::Running)
            .await;
    }
}

/// One fetch result from a producer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<M> {
    /// Items to enqueue, in order.
    pub items: Vec<M>,
    /// Whether the source may have more right away. When false the
    /// producer pauses before fetching again.
    pub has_more: bool,
}

impl<M> Batch<M> {
    /// A batch with more items expected immediately.
    #[must_use]
    pub const fn more(items: Vec<M>) -> Self {
        Self {
            items,
            has_more: true,
        }
    }

    /// The last batch currently available.
    #[must_use]
    pub const fn last(items: Vec<M>) -> Self {
        Self {
            items,
            has_more: false,
        }
    }

    /// Nothing to do right now.
    #[must_use]
    pub const fn empty() -> Self {
        Self::last(Vec::new())
    }

    /// Number of items in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<M> Default for Batch<M> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<M> From<(Vec<M>, bool)> for Batch<M> {
    fn from((items, has_more): (Vec<M>, bool)) -> Self {
        Self { items, has_more }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_constructors() {
        let batch = Batch::more(vec![1, 2]);
        assert!(batch.has_more);
        assert_eq!(batch.len(), 2);

        let batch = Batch::last(vec![3]);
        assert!(!batch.has_more);

        let batch: Batch<u8> = Batch::default();
        assert!(batch.is_empty());
        assert!(!batch.has_more);

        let batch = Batch::from((vec!["a"], true));
        assert_eq!(batch, Batch::more(vec!["a"]));
    }

    #[tokio::test]
    async fn test_context_observes_draining() {
        let (tx, rx) = watch::channel(BrokerState::Running);
        let mut ctx = JobContext::new(Arc::from("mail"), WorkerRole::Consumer, 3, rx);
        assert_eq!(ctx.broker(), "mail");
        assert_eq!(ctx.worker(), 3);
        assert_eq!(ctx.role(), WorkerRole::Consumer);
        assert!(!ctx.is_draining());

        tx.send_replace(BrokerState::Draining);
        ctx.draining().await;
        assert!(ctx.is_draining());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BrokerState::Running.to_string(), "running");
        assert_eq!(BrokerState::Stopped.to_string(), "stopped");
    }
}
