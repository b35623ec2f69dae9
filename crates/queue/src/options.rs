//! Broker pool sizing and queue capacity.

use std::time::Duration;

use jobkit_common::{BackoffConfig, PoolConfig};

/// Default producer pause after an exhausted fetch.
const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest pause an idle producer takes between fetches.
const MIN_IDLE_INTERVAL: Duration = Duration::from_millis(1);

/// Broker construction options.
///
/// Values are kept as given; [`BrokerOptions::resolve`] turns them into
/// usable sizes, replacing anything zero or negative with 1.
///
/// ```
/// use jobkit_queue::BrokerOptions;
///
/// let resolved = BrokerOptions::default()
///     .with_queue_len(16)
///     .with_consumer_num(4)
///     .with_producer_num(-3)
///     .resolve();
///
/// assert_eq!(resolved.queue_len, 16);
/// assert_eq!(resolved.consumer_num, 4);
/// assert_eq!(resolved.producer_num, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOptions {
    /// Local queue capacity.
    pub queue_len: i64,
    /// Number of consumer workers.
    pub consumer_num: i64,
    /// Number of producer workers.
    pub producer_num: i64,
    /// Producer pause after a batch reports nothing more to fetch.
    pub idle_interval: Duration,
    /// Reserved; not acted on.
    pub backoff: Option<BackoffConfig>,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            queue_len: 0,
            consumer_num: 0,
            producer_num: 0,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            backoff: None,
        }
    }
}

impl BrokerOptions {
    /// Set the local queue capacity.
    #[must_use]
    pub const fn with_queue_len(mut self, len: i64) -> Self {
        self.queue_len = len;
        self
    }

    /// Set the number of consumer workers.
    #[must_use]
    pub const fn with_consumer_num(mut self, num: i64) -> Self {
        self.consumer_num = num;
        self
    }

    /// Set the number of producer workers.
    #[must_use]
    pub const fn with_producer_num(mut self, num: i64) -> Self {
        self.producer_num = num;
        self
    }

    /// Set how long a producer waits after an exhausted fetch.
    #[must_use]
    pub const fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Attach retry backoff settings. Accepted for forward compatibility only.
    #[must_use]
    pub fn with_backoff(
        mut self,
        initial_delay: Duration,
        max_delay: Duration,
        max_retries: u32,
        factor: f64,
    ) -> Self {
        self.backoff = Some(BackoffConfig::new(
            initial_delay,
            max_delay,
            max_retries,
            factor,
        ));
        self
    }

    /// Normalize into the sizes a broker runs with.
    #[must_use]
    pub fn resolve(&self) -> ResolvedOptions {
        ResolvedOptions {
            queue_len: at_least_one(self.queue_len),
            consumer_num: at_least_one(self.consumer_num),
            producer_num: at_least_one(self.producer_num),
            idle_interval: self.idle_interval.max(MIN_IDLE_INTERVAL),
            backoff: self.backoff.clone(),
        }
    }
}

impl From<&PoolConfig> for BrokerOptions {
    fn from(pool: &PoolConfig) -> Self {
        Self {
            queue_len: pool.queue_len,
            consumer_num: pool.consumer_num,
            producer_num: pool.producer_num,
            idle_interval: Duration::from_millis(pool.idle_interval_ms),
            backoff: Some(pool.backoff.clone()),
        }
    }
}

/// Options after normalization. Every size is at least 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    /// Queue capacity.
    pub queue_len: usize,
    /// Consumer workers to spawn.
    pub consumer_num: usize,
    /// Producer workers to spawn.
    pub producer_num: usize,
    /// Producer pause after an exhausted fetch.
    pub idle_interval: Duration,
    /// Reserved retry settings.
    pub backoff: Option<BackoffConfig>,
}

fn at_least_one(value: i64) -> usize {
    usize::try_from(value).map_or(1, |v| v.max(1))
}
