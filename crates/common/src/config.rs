//! Application configuration.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Job server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Worker pools keyed by job name.
    #[serde(default)]
    pub pools: HashMap<String, PoolConfig>,
}

/// Job server identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Service name reported to the host registry.
    #[serde(default = "default_name")]
    pub name: String,
    /// Endpoint advertised for discovery.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Verbose lifecycle logging.
    #[serde(default)]
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            endpoint: default_endpoint(),
            debug: false,
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    /// Connection timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-command timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub command_timeout_ms: u64,
}

/// Worker pool configuration for one job type.
///
/// Sizes are signed on purpose: zero or negative values are accepted here
/// and normalized when the broker is built.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolConfig {
    /// Local queue capacity.
    #[serde(default)]
    pub queue_len: i64,
    /// Number of consumer workers.
    #[serde(default)]
    pub consumer_num: i64,
    /// Number of producer workers.
    #[serde(default)]
    pub producer_num: i64,
    /// Maximum items fetched per producer call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Producer pause after an exhausted fetch, in milliseconds.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Reserved retry settings.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Retry backoff settings.
///
/// Accepted and carried through to the broker, but no retry is performed:
/// every item gets exactly one attempt.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay between retries, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Multiplier for exponential backoff.
    #[serde(default = "default_factor")]
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            factor: default_factor(),
        }
    }
}

impl BackoffConfig {
    /// Build from durations.
    #[must_use]
    pub fn new(initial_delay: Duration, max_delay: Duration, max_retries: u32, factor: f64) -> Self {
        Self {
            initial_delay_ms: saturating_millis(initial_delay),
            max_delay_ms: saturating_millis(max_delay),
            max_retries,
            factor,
        }
    }

    /// Initial delay as a [`Duration`].
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Maximum delay as a [`Duration`].
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_name() -> String {
    "jobkit".to_string()
}

fn default_endpoint() -> String {
    "localhost".to_string()
}

fn default_redis_prefix() -> String {
    "jobkit".to_string()
}

const fn default_timeout_ms() -> u64 {
    1000
}

const fn default_batch_size() -> usize {
    16
}

const fn default_idle_interval_ms() -> u64 {
    1000
}

const fn default_initial_delay_ms() -> u64 {
    60_000
}

const fn default_max_delay_ms() -> u64 {
    24 * 3600 * 1000
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_factor() -> f64 {
    2.0
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `JOBKIT_ENV`)
    /// 4. Environment variables with `JOBKIT__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("JOBKIT_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("JOBKIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("JOBKIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
