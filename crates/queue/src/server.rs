//! Lifecycle host for job brokers.
//!
//! A [`Server`] owns a registry of [`JobServer`]s. Starting it spawns each
//! job's consumer and producer workers as tokio tasks; stopping it closes
//! every job concurrently and then waits for all spawned tasks.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::join_all;
use jobkit_common::{AppError, AppResult, ServerConfig};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::job::JobServer;
use crate::transport::{Endpointer, Transport};

/// URL scheme used when advertising the endpoint.
const ENDPOINT_SCHEME: &str = "job";

/// Hosts a set of jobs and runs their worker pools.
pub struct Server {
    name: String,
    endpoint: String,
    debug: bool,

    registry: Vec<Arc<dyn JobServer>>,

    started: AtomicBool,
    // Held for the whole of start and stop, so lifecycle calls never interleave.
    tasks: Mutex<JoinSet<()>>,
    live: Arc<AtomicUsize>,
}

impl Server {
    /// Create a server with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: String::new(),
            debug: false,
            registry: Vec::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(JoinSet::new()),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a server from configuration.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.name.clone())
            .with_endpoint(config.endpoint.clone())
            .with_debug(config.debug)
    }

    /// Set the advertised endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Enable verbose lifecycle logging.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advertised endpoint, as `job://<endpoint>`.
    pub fn endpoint(&self) -> AppResult<Url> {
        Ok(Url::parse(&format!("{ENDPOINT_SCHEME}://{}", self.endpoint))?)
    }

    /// Register a job. Rejected once the server has started.
    pub fn register<J>(&mut self, job: Arc<J>) -> AppResult<()>
    where
        J: JobServer + 'static,
    {
        self.register_all([job as Arc<dyn JobServer>])
    }

    /// Register several jobs at once. Rejected once the server has started;
    /// in that case none of them are added.
    pub fn register_all<I>(&mut self, jobs: I) -> AppResult<()>
    where
        I: IntoIterator<Item = Arc<dyn JobServer>>,
    {
        if self.is_started() {
            return Err(AppError::Lifecycle(format!(
                "cannot register jobs on running server {}",
                self.name
            )));
        }
        self.registry.extend(jobs);
        Ok(())
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether the worker pools are running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Worker tasks spawned by this server that have not finished yet.
    #[must_use]
    pub fn running_tasks(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Spawn every job's worker pools and return without waiting on them.
    ///
    /// Calling this on a started server does nothing.
    pub async fn start(&self) -> AppResult<()> {
        let mut tasks = self.tasks.lock().await;
        if self.is_started() {
            return Ok(());
        }

        for job in &self.registry {
            if self.debug {
                debug!(
                    server = %self.name,
                    job = job.name(),
                    consumers = job.consumer_num(),
                    producers = job.producer_num(),
                    "Spawning worker pools"
                );
            }

            for _ in 0..job.consumer_num() {
                let job = Arc::clone(job);
                let guard = self.track();
                tasks.spawn(async move {
                    let _guard = guard;
                    job.consume().await;
                });
            }

            for _ in 0..job.producer_num() {
                let job = Arc::clone(job);
                let guard = self.track();
                tasks.spawn(async move {
                    let _guard = guard;
                    job.produce().await;
                });
            }
        }

        info!(
            server = %self.name,
            endpoint = %self.endpoint,
            jobs = self.registry.len(),
            tasks = tasks.len(),
            "Job server started"
        );

        self.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Close every job concurrently, then wait for all spawned tasks.
    ///
    /// Calling this on a server that is not running does nothing. The server
    /// is always fully stopped on return; an error means at least one worker
    /// task panicked or was cancelled.
    pub async fn stop(&self) -> AppResult<()> {
        let mut tasks = self.tasks.lock().await;
        if !self.is_started() {
            warn!(server = %self.name, "Stop called on a server that is not running");
            return Ok(());
        }

        info!(server = %self.name, "Job server stopping");

        join_all(self.registry.iter().map(|job| job.close())).await;

        let mut failed = 0_usize;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                failed += 1;
                error!(server = %self.name, error = %e, "Worker task failed");
            }
        }

        self.started.store(false, Ordering::Release);
        info!(server = %self.name, failed, "Job server stopped");

        if failed > 0 {
            return Err(AppError::Queue(format!(
                "{failed} worker task(s) of server {} did not finish cleanly",
                self.name
            )));
        }
        Ok(())
    }

    /// Start, wait for `shutdown` to resolve, then stop.
    pub async fn serve<F>(&self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }

    fn track(&self) -> TaskGuard {
        self.live.fetch_add(1, Ordering::AcqRel);
        TaskGuard(Arc::clone(&self.live))
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("jobs", &self.registry.len())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for Server {
    fn name(&self) -> &str {
        Self::name(self)
    }

    async fn start(&self) -> AppResult<()> {
        Self::start(self).await
    }

    async fn stop(&self) -> AppResult<()> {
        Self::stop(self).await
    }
}

impl Endpointer for Server {
    fn endpoint(&self) -> AppResult<Url> {
        Self::endpoint(self)
    }
}

/// Decrements the live task count when a spawned task ends or is dropped.
struct TaskGuard(Arc<AtomicUsize>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Idle;

    #[async_trait]
    impl JobServer for Idle {
        fn consumer_num(&self) -> usize {
            0
        }

        fn producer_num(&self) -> usize {
            0
        }

        async fn consume(&self) {}

        async fn produce(&self) {}

        async fn close(&self) {}
    }

    /// Job whose consumer workers die instead of returning.
    struct Crashing;

    #[async_trait]
    impl JobServer for Crashing {
        fn consumer_num(&self) -> usize {
            2
        }

        fn producer_num(&self) -> usize {
            0
        }

        #[allow(clippy::panic)]
        async fn consume(&self) {
            panic!("consumer crashed");
        }

        async fn produce(&self) {}

        async fn close(&self) {}
    }

    #[test]
    fn test_metadata() {
        let server = Server::new("mailer").with_endpoint("10.0.0.5:9000");
        assert_eq!(server.name(), "mailer");

        let url = server.endpoint().unwrap();
        assert_eq!(url.scheme(), "job");
        assert_eq!(url.host_str(), Some("10.0.0.5"));
        assert_eq!(url.port(), Some(9000));
    }

    #[test]
    fn test_from_config() {
        let server = Server::from_config(&ServerConfig::default());
        assert_eq!(server.name(), "jobkit");
        assert_eq!(server.endpoint().unwrap().host_str(), Some("localhost"));
        assert!(!server.is_started());
    }

    #[tokio::test]
    async fn test_register_after_start_is_rejected() {
        let mut server = Server::new("jobs");
        server.register(Arc::new(Idle)).unwrap();
        server.start().await.unwrap();

        let err = server.register(Arc::new(Idle)).unwrap_err();
        assert!(matches!(err, AppError::Lifecycle(_)));
        assert_eq!(server.job_count(), 1);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let server = Server::new("jobs");
        server.stop().await.unwrap();
        assert!(!server.is_started());
    }

    #[tokio::test]
    async fn test_serve_runs_until_shutdown() {
        let mut server = Server::new("jobs");
        server.register(Arc::new(Idle)).unwrap();

        server.serve(async {}).await.unwrap();
        assert!(!server.is_started());
        assert_eq!(server.running_tasks(), 0);
    }

    #[tokio::test]
    async fn test_stop_reports_crashed_workers() {
        let mut server = Server::new("crashy");
        server.register(Arc::new(Crashing)).unwrap();
        server.register(Arc::new(Idle)).unwrap();
        server.start().await.unwrap();

        let err = server.stop().await.unwrap_err();
        assert!(matches!(err, AppError::Queue(_)));
        assert!(err.to_string().contains("2 worker task(s)"));

        // Teardown still completed.
        assert!(!server.is_started());
        assert_eq!(server.running_tasks(), 0);
        server.stop().await.unwrap();
    }
}
