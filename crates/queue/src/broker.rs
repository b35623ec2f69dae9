//! Generic producer/consumer broker.
//!
//! A [`Broker`] connects a data source to a processing callback through a
//! bounded queue:
//!
//! - **Producers** call the producer callback for a [`Batch`] and push each
//!   item onto the queue, waiting while it is full.
//! - **Consumers** pop items and hand each one to the consumer callback. A
//!   failed item is logged and counted; the worker carries on.
//! - **Shutdown** is cooperative. [`JobServer::close`] moves the broker to
//!   [`BrokerState::Draining`], producers finish their current batch and exit,
//!   the queue closes once the last producer handle is gone, and consumers
//!   drain what is left before exiting.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jobkit_queue::{Batch, BoxError, Broker, BrokerOptions, JobServer};
//!
//! # async fn example() {
//! let source = Arc::new(vec!["a".to_string(), "b".to_string()]);
//! let broker = Arc::new(Broker::new(
//!     "letters",
//!     source,
//!     |_ctx, source: Arc<Vec<String>>| async move { Batch::last(source.to_vec()) },
//!     |_ctx, letter: String| async move {
//!         println!("{letter}");
//!         Ok::<(), BoxError>(())
//!     },
//!     BrokerOptions::default().with_queue_len(4),
//! ));
//!
//! let worker = Arc::clone(&broker);
//! tokio::spawn(async move { worker.consume().await });
//! broker.close().await;
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use jobkit_common::BoxError;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::job::{Batch, BrokerState, JobContext, JobServer, WorkerRole};
use crate::options::{BrokerOptions, ResolvedOptions};

type ProducerFn<M, S> =
    Box<dyn Fn(JobContext, Arc<S>) -> BoxFuture<'static, Batch<M>> + Send + Sync>;

type ConsumerFn<M> =
    Box<dyn Fn(JobContext, M) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Point-in-time view of a broker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStats {
    /// Current lifecycle state.
    pub state: BrokerState,
    /// Items returned by the producer callback.
    pub fetched: u64,
    /// Items the consumer callback accepted.
    pub processed: u64,
    /// Items whose consumer callback errored or panicked.
    pub failed: u64,
    /// Producer and consumer workers currently running.
    pub active_workers: usize,
}

#[derive(Debug, Default)]
struct Counters {
    fetched: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Generic producer/consumer engine for one job type.
///
/// `M` is the message type moved through the queue and `S` the data source
/// handed to the producer callback. The source is shared, never owned:
/// the broker only keeps an [`Arc`] to it.
pub struct Broker<M, S> {
    name: Arc<str>,
    options: ResolvedOptions,
    source: Arc<S>,

    // Producer side of the queue. Taken on close; workers hold clones.
    sender: Mutex<Option<mpsc::Sender<M>>>,
    receiver: Mutex<mpsc::Receiver<M>>,

    producer: ProducerFn<M, S>,
    consumer: ConsumerFn<M>,

    state: watch::Sender<BrokerState>,
    active: watch::Sender<usize>,

    next_producer: AtomicUsize,
    next_consumer: AtomicUsize,
    counters: Counters,
}

impl<M, S> Broker<M, S>
where
    M: Send + 'static,
    S: Send + Sync + 'static,
{
    /// Create a broker.
    ///
    /// Options are resolved here, once: non-positive sizes become 1. The
    /// queue is allocated with the resolved capacity and never resized.
    pub fn new<P, PF, C, CF>(
        name: impl Into<String>,
        source: Arc<S>,
        producer: P,
        consumer: C,
        options: BrokerOptions,
    ) -> Self
    where
        P: Fn(JobContext, Arc<S>) -> PF + Send + Sync + 'static,
        PF: Future<Output = Batch<M>> + Send + 'static,
        C: Fn(JobContext, M) -> CF + Send + Sync + 'static,
        CF: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let options = options.resolve();
        let (sender, receiver) = mpsc::channel(options.queue_len);
        let (state, _) = watch::channel(BrokerState::Running);
        let (active, _) = watch::channel(0);

        Self {
            name: Arc::from(name.into()),
            options,
            source,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(receiver),
            producer: Box::new(move |ctx, source| producer(ctx, source).boxed()),
            consumer: Box::new(move |ctx, msg| consumer(ctx, msg).boxed()),
            state,
            active,
            next_producer: AtomicUsize::new(0),
            next_consumer: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    /// Resolved options this broker runs with.
    #[must_use]
    pub const fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    /// Data source passed to the producer callback.
    #[must_use]
    pub const fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BrokerState {
        *self.state.borrow()
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            state: self.state(),
            fetched: self.counters.fetched.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            active_workers: *self.active.borrow(),
        }
    }

    fn is_running(&self) -> bool {
        self.state() == BrokerState::Running
    }

    fn context(&self, role: WorkerRole, worker: usize) -> JobContext {
        JobContext::new(
            Arc::clone(&self.name),
            role,
            worker,
            self.state.subscribe(),
        )
    }

    async fn run_producer(&self) {
        let _active = ActiveWorker::enter(&self.active);
        let worker = self.next_producer.fetch_add(1, Ordering::Relaxed);

        let Some(tx) = self.sender.lock().await.clone() else {
            debug!(broker = %self.name, worker, "Broker closed before producer started");
            return;
        };
        let mut state = self.state.subscribe();

        debug!(broker = %self.name, worker, "Producer started");

        while self.is_running() {
            let ctx = self.context(WorkerRole::Producer, worker);
            let Batch { items, has_more } = (self.producer)(ctx, Arc::clone(&self.source)).await;

            if !items.is_empty() {
                self.counters
                    .fetched
                    .fetch_add(items.len() as u64, Ordering::Relaxed);
                debug!(broker = %self.name, worker, count = items.len(), "Fetched batch");
            }

            for msg in items {
                if tx.send(msg).await.is_err() {
                    warn!(broker = %self.name, worker, "Queue receiver gone, producer exiting");
                    return;
                }
            }

            if !has_more {
                tokio::select! {
                    () = tokio::time::sleep(self.options.idle_interval) => {}
                    _ = state.changed() => {}
                }
            }
        }

        debug!(broker = %self.name, worker, "Producer stopped");
    }

    async fn run_consumer(&self) {
        let _active = ActiveWorker::enter(&self.active);
        let worker = self.next_consumer.fetch_add(1, Ordering::Relaxed);

        debug!(broker = %self.name, worker, "Consumer started");

        loop {
            let next = self.receiver.lock().await.recv().await;
            let Some(msg) = next else {
                break;
            };

            let ctx = self.context(WorkerRole::Consumer, worker);
            match AssertUnwindSafe((self.consumer)(ctx, msg))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(broker = %self.name, worker, error = %e, "Job failed");
                }
                Err(_) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(broker = %self.name, worker, "Job panicked");
                }
            }
        }

        debug!(broker = %self.name, worker, "Consumer finished, queue drained");
    }

    async fn drain(&self) {
        let began = self.state.send_if_modified(|state| {
            if *state == BrokerState::Running {
                *state = BrokerState::Draining;
                true
            } else {
                false
            }
        });

        if began {
            info!(broker = %self.name, "Broker draining");
            // Producers still hold their own handles; the queue closes
            // when the last of them exits.
            self.sender.lock().await.take();
        }

        let mut active = self.active.subscribe();
        let _ = active.wait_for(|count| *count == 0).await;

        let stopped = self.state.send_if_modified(|state| {
            if *state == BrokerState::Draining {
                *state = BrokerState::Stopped;
                true
            } else {
                false
            }
        });

        if stopped {
            let stats = self.stats();
            info!(
                broker = %self.name,
                fetched = stats.fetched,
                processed = stats.processed,
                failed = stats.failed,
                "Broker stopped"
            );
        }
    }
}

#[async_trait]
impl<M, S> JobServer for Broker<M, S>
where
    M: Send + 'static,
    S: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn consumer_num(&self) -> usize {
        self.options.consumer_num
    }

    fn producer_num(&self) -> usize {
        self.options.producer_num
    }

    async fn consume(&self) {
        self.run_consumer().await;
    }

    async fn produce(&self) {
        self.run_producer().await;
    }

    async fn close(&self) {
        self.drain().await;
    }
}

impl<M, S> fmt::Debug for Broker<M, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("state", &*self.state.borrow())
            .field("active_workers", &*self.active.borrow())
            .finish_non_exhaustive()
    }
}

/// Counts a worker as active for as long as it is held.
struct ActiveWorker<'a>(&'a watch::Sender<usize>);

impl<'a> ActiveWorker<'a> {
    fn enter(active: &'a watch::Sender<usize>) -> Self {
        active.send_modify(|count| *count += 1);
        Self(active)
    }
}

impl Drop for ActiveWorker<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count = count.saturating_sub(1));
    }
}
