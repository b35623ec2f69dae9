//! Redis-backed key-value store for job sources and sinks.
//!
//! Producer and consumer callbacks use [`KvStore`] to read work and record
//! results. Every key is namespaced with the configured prefix, so
//! `get("seen:1")` with prefix `jobkit` reads `jobkit:seen:1`.
//!
//! # Example
//!
//! ```ignore
//! use jobkit_queue::store::{KvStore, StoreOptions};
//!
//! let store = KvStore::connect(&StoreOptions::new("redis://localhost:6379")).await?;
//! store.rpush("queue:mail", vec!["{\"id\":\"1\"}".to_string()]).await?;
//! let batch = store.pop_batch("queue:mail", 16).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fred::clients::Client as RedisClient;
use fred::cmd;
use fred::interfaces::{
    ClientLike, HashesInterface, KeysInterface, ListInterface, SetsInterface, SortedSetsInterface,
};
use fred::types::config::{Config as FredConfig, ConnectionConfig, PerformanceConfig};
use fred::types::{Expiration, SetOptions, Value};
use jobkit_common::{AppResult, RedisConfig};
use tracing::{debug, info};

/// Default connect and command timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection settings for [`KvStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Redis connection URL.
    pub url: String,
    /// Namespace prepended to every key.
    pub prefix: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Per-command timeout.
    pub command_timeout: Duration,
}

impl StoreOptions {
    /// Options with default prefix and timeouts.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            prefix: "jobkit".to_string(),
            connect_timeout: DEFAULT_TIMEOUT,
            command_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the key namespace.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl From<&RedisConfig> for StoreOptions {
    fn from(config: &RedisConfig) -> Self {
        Self {
            url: config.url.clone(),
            prefix: config.prefix.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        }
    }
}

/// Namespaced Redis client.
#[derive(Clone)]
pub struct KvStore {
    redis: Arc<RedisClient>,
    prefix: String,
}

impl KvStore {
    /// Connect to Redis.
    pub async fn connect(options: &StoreOptions) -> AppResult<Self> {
        let config = FredConfig::from_url(&options.url)?;
        let performance = PerformanceConfig {
            default_command_timeout: options.command_timeout,
            ..Default::default()
        };
        let connection = ConnectionConfig {
            connection_timeout: options.connect_timeout,
            ..Default::default()
        };

        let client = RedisClient::new(config, Some(performance), Some(connection), None);
        client.init().await?;

        info!(prefix = %options.prefix, "Connected to Redis store");

        Ok(Self::from_client(Arc::new(client), options.prefix.clone()))
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn from_client(redis: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    /// Underlying client.
    #[must_use]
    pub const fn client(&self) -> &Arc<RedisClient> {
        &self.redis
    }

    /// Key namespace.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Close the connection.
    pub async fn quit(&self) -> AppResult<()> {
        self.redis.quit().await?;
        Ok(())
    }

    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.prefix)
        }
    }

    fn keys<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        keys.into_iter().map(|k| self.key(k)).collect()
    }

    // === Strings ===

    /// Get a string value.
    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.redis.get(self.key(key)).await?)
    }

    /// Get an integer value.
    pub async fn get_int(&self, key: &str) -> AppResult<Option<i64>> {
        Ok(self.redis.get(self.key(key)).await?)
    }

    /// Set a value without expiry.
    pub async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.redis
            .set::<(), _, _>(self.key(key), value, None, None, false)
            .await?;
        Ok(())
    }

    /// Set a value that expires after `ttl_secs`.
    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> AppResult<()> {
        self.redis
            .set::<(), _, _>(
                self.key(key),
                value,
                Some(Expiration::EX(ttl_secs)),
                None,
                false,
            )
            .await?;
        Ok(())
    }

    /// Set a value only if the key is absent. Returns whether it was set.
    pub async fn set_nx(&self, key: &str, value: &str, ttl_secs: i64) -> AppResult<bool> {
        // NX returns nil when the key already exists.
        let result: Option<String> = self
            .redis
            .set(
                self.key(key),
                value,
                Some(Expiration::EX(ttl_secs)),
                Some(SetOptions::NX),
                false,
            )
            .await?;
        Ok(result.is_some())
    }

    /// Overwrite a value while keeping its remaining TTL.
    ///
    /// Returns `true` without writing when the key has expired or has no TTL.
    pub async fn set_keep_ttl(&self, key: &str, value: &str) -> AppResult<bool> {
        if self.ttl(key).await? < 0 {
            return Ok(true);
        }
        self.redis
            .set::<(), _, _>(
                self.key(key),
                value,
                Some(Expiration::KEEPTTL),
                None,
                false,
            )
            .await?;
        Ok(false)
    }

    // === Keys ===

    /// Whether the key exists.
    pub async fn exists(&self, key: &str) -> AppResult<bool> {
        let count: i64 = self.redis.exists(self.key(key)).await?;
        Ok(count > 0)
    }

    /// Set a key's TTL. Returns whether the key existed.
    pub async fn expire(&self, key: &str, ttl_secs: i64) -> AppResult<bool> {
        let updated: i64 = self.redis.expire(self.key(key), ttl_secs, None).await?;
        Ok(updated == 1)
    }

    /// Remaining TTL in seconds; `-1` without expiry, `-2` when missing.
    pub async fn ttl(&self, key: &str) -> AppResult<i64> {
        Ok(self.redis.ttl(self.key(key)).await?)
    }

    /// Delete keys. Returns how many were removed.
    pub async fn del(&self, keys: &[&str]) -> AppResult<i64> {
        Ok(self.redis.del(self.keys(keys.iter().copied())).await?)
    }

    // === Counters ===

    /// Increment by one.
    pub async fn incr(&self, key: &str) -> AppResult<i64> {
        Ok(self.redis.incr(self.key(key)).await?)
    }

    /// Increment by `by`.
    pub async fn incr_by(&self, key: &str, by: i64) -> AppResult<i64> {
        Ok(self.redis.incr_by(self.key(key), by).await?)
    }

    /// Decrement by one.
    pub async fn decr(&self, key: &str) -> AppResult<i64> {
        Ok(self.redis.decr(self.key(key)).await?)
    }

    // === Multi-key ===

    /// Get several values; missing keys are left out of the map.
    pub async fn mget(&self, keys: &[&str]) -> AppResult<HashMap<String, String>> {
        let values: Vec<Option<String>> = self.redis.mget(self.keys(keys.iter().copied())).await?;
        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| ((*key).to_string(), v)))
            .collect())
    }

    /// Set several values.
    pub async fn mset(&self, values: HashMap<String, String>) -> AppResult<()> {
        let values: HashMap<String, String> = values
            .into_iter()
            .map(|(key, value)| (self.key(&key), value))
            .collect();
        self.redis.mset(values).await?;
        Ok(())
    }

    // === Lists ===

    /// Push to the head of a list. Returns the new length.
    pub async fn lpush(&self, key: &str, values: Vec<String>) -> AppResult<i64> {
        Ok(self.redis.lpush(self.key(key), values).await?)
    }

    /// Push to the tail of a list. Returns the new length.
    pub async fn rpush(&self, key: &str, values: Vec<String>) -> AppResult<i64> {
        Ok(self.redis.rpush(self.key(key), values).await?)
    }

    /// Pop from the head of a list.
    pub async fn lpop(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.redis.lpop(self.key(key), None).await?)
    }

    /// Pop from the tail of a list.
    pub async fn rpop(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.redis.rpop(self.key(key), None).await?)
    }

    /// Pop up to `count` items from the tail of a list, oldest pushed first
    /// when the list is filled with `lpush`.
    pub async fn pop_batch(&self, key: &str, count: usize) -> AppResult<Vec<String>> {
        let items: Option<Vec<String>> = self.redis.rpop(self.key(key), Some(count.max(1))).await?;
        let items = items.unwrap_or_default();
        if !items.is_empty() {
            debug!(key, count = items.len(), "Popped batch");
        }
        Ok(items)
    }

    /// List length.
    pub async fn llen(&self, key: &str) -> AppResult<i64> {
        Ok(self.redis.llen(self.key(key)).await?)
    }

    /// List elements between `start` and `stop`, inclusive.
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> AppResult<Vec<String>> {
        Ok(self.redis.lrange(self.key(key), start, stop).await?)
    }

    // === Hashes ===

    /// Get a hash field.
    pub async fn hget(&self, key: &str, field: &str) -> AppResult<Option<String>> {
        Ok(self.redis.hget(self.key(key), field).await?)
    }

    /// Set hash fields. Returns how many were newly created.
    pub async fn hset(&self, key: &str, values: HashMap<String, String>) -> AppResult<i64> {
        Ok(self.redis.hset(self.key(key), values).await?)
    }

    /// All fields of a hash.
    pub async fn hgetall(&self, key: &str) -> AppResult<HashMap<String, String>> {
        Ok(self.redis.hgetall(self.key(key)).await?)
    }

    /// Increment a hash field.
    pub async fn hincr_by(&self, key: &str, field: &str, by: i64) -> AppResult<i64> {
        Ok(self.redis.hincrby(self.key(key), field, by).await?)
    }

    /// Delete hash fields. Returns how many were removed.
    pub async fn hdel(&self, key: &str, fields: &[&str]) -> AppResult<i64> {
        let fields: Vec<String> = fields.iter().map(|f| (*f).to_string()).collect();
        Ok(self.redis.hdel(self.key(key), fields).await?)
    }

    /// Whether a hash field exists.
    pub async fn hexists(&self, key: &str, field: &str) -> AppResult<bool> {
        let exists: i64 = self.redis.hexists(self.key(key), field).await?;
        Ok(exists > 0)
    }

    /// Field names of a hash.
    pub async fn hkeys(&self, key: &str) -> AppResult<Vec<String>> {
        Ok(self.redis.hkeys(self.key(key)).await?)
    }

    /// Get a hash field parsed as an integer.
    pub async fn hget_int(&self, key: &str, field: &str) -> AppResult<Option<i64>> {
        Ok(self.redis.hget(self.key(key), field).await?)
    }

    /// Get several hash fields; missing fields are left out of the map.
    pub async fn hmget(&self, key: &str, fields: &[&str]) -> AppResult<HashMap<String, String>> {
        let names: Vec<String> = fields.iter().map(|f| (*f).to_string()).collect();
        let values: Vec<Option<String>> = self.redis.hmget(self.key(key), names).await?;
        Ok(fields
            .iter()
            .zip(values)
            .filter_map(|(field, value)| value.map(|v| ((*field).to_string(), v)))
            .collect())
    }

    // === Sets ===

    /// Add members to a set. Returns how many were new.
    pub async fn sadd(&self, key: &str, members: Vec<String>) -> AppResult<i64> {
        Ok(self.redis.sadd(self.key(key), members).await?)
    }

    /// Remove members from a set. Returns how many were removed.
    pub async fn srem(&self, key: &str, members: Vec<String>) -> AppResult<i64> {
        Ok(self.redis.srem(self.key(key), members).await?)
    }

    /// All members of a set.
    pub async fn smembers(&self, key: &str) -> AppResult<Vec<String>> {
        Ok(self.redis.smembers(self.key(key)).await?)
    }

    /// Whether `member` is in the set.
    pub async fn sismember(&self, key: &str, member: &str) -> AppResult<bool> {
        let found: i64 = self.redis.sismember(self.key(key), member).await?;
        Ok(found > 0)
    }

    /// Set cardinality.
    pub async fn scard(&self, key: &str) -> AppResult<i64> {
        Ok(self.redis.scard(self.key(key)).await?)
    }

    /// Up to `count` distinct random members.
    pub async fn srand_members(&self, key: &str, count: usize) -> AppResult<Vec<String>> {
        Ok(self.redis.srandmember(self.key(key), Some(count)).await?)
    }

    // === Sorted sets ===

    /// Add or update scored members. Returns how many were new.
    pub async fn zadd(&self, key: &str, members: Vec<(f64, String)>) -> AppResult<i64> {
        Ok(self
            .redis
            .zadd(self.key(key), None, None, false, false, members)
            .await?)
    }

    /// Remove members scored within `[min, max]`. Returns how many were removed.
    pub async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> AppResult<i64> {
        Ok(self.redis.zremrangebyscore(self.key(key), min, max).await?)
    }

    /// Members scored within `[min, max]`, highest first, paged by
    /// `offset` and `count`.
    pub async fn zrev_range_by_score(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: i64,
        count: i64,
    ) -> AppResult<Vec<String>> {
        Ok(self
            .redis
            .zrevrangebyscore(self.key(key), max, min, false, Some((offset, count)))
            .await?)
    }

    /// Score of a member.
    pub async fn zscore(&self, key: &str, member: &str) -> AppResult<Option<f64>> {
        Ok(self.redis.zscore(self.key(key), member).await?)
    }

    /// Sorted set cardinality.
    pub async fn zcard(&self, key: &str) -> AppResult<i64> {
        Ok(self.redis.zcard(self.key(key)).await?)
    }

    // === Bitmaps ===

    /// Set the bit at `offset`. Returns the previous bit.
    pub async fn setbit(&self, key: &str, offset: u64, on: bool) -> AppResult<bool> {
        let args = vec![
            Value::from(self.key(key)),
            Value::from(offset as i64),
            Value::from(i64::from(on)),
        ];
        let previous: i64 = self.redis.custom(cmd!("SETBIT"), args).await?;
        Ok(previous == 1)
    }

    /// Bit at `offset`; unset bits and missing keys read as `false`.
    pub async fn getbit(&self, key: &str, offset: u64) -> AppResult<bool> {
        let args = vec![Value::from(self.key(key)), Value::from(offset as i64)];
        let bit: i64 = self.redis.custom(cmd!("GETBIT"), args).await?;
        Ok(bit == 1)
    }

    /// Number of set bits, optionally within a byte range.
    pub async fn bitcount(&self, key: &str, range: Option<(i64, i64)>) -> AppResult<i64> {
        let mut args = vec![Value::from(self.key(key))];
        if let Some((start, end)) = range {
            args.push(Value::from(start));
            args.push(Value::from(end));
        }
        Ok(self.redis.custom(cmd!("BITCOUNT"), args).await?)
    }

    /// Position of the first bit equal to `on`, or -1 when there is none.
    pub async fn bitpos(&self, key: &str, on: bool) -> AppResult<i64> {
        let args = vec![Value::from(self.key(key)), Value::from(i64::from(on))];
        Ok(self.redis.custom(cmd!("BITPOS"), args).await?)
    }

    /// Run raw `BITFIELD` subcommands, e.g. `["INCRBY", "u8", "0", "1"]`.
    /// Each entry of the reply is `None` when an `OVERFLOW FAIL` guard tripped.
    pub async fn bitfield(&self, key: &str, ops: &[&str]) -> AppResult<Vec<Option<i64>>> {
        let mut args = vec![Value::from(self.key(key))];
        args.extend(ops.iter().map(|op| Value::from(*op)));
        Ok(self.redis.custom(cmd!("BITFIELD"), args).await?)
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
