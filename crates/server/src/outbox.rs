//! Outbox pools: brokers that drain a Redis list of JSON jobs.
//!
//! Each configured pool reads `{prefix}:queue:{pool}`. Jobs are pushed with
//! `LPUSH` and popped from the tail, so they are handled oldest first.
//! Per-pool results are counted in the hash `{prefix}:stats:{pool}`.

use std::sync::Arc;

use jobkit_common::PoolConfig;
use jobkit_queue::{Batch, BoxError, Broker, BrokerOptions, JobContext, KvStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How long a processed job id is remembered for duplicate detection.
const SEEN_TTL_SECS: i64 = 24 * 3600;

/// Job envelope stored in the outbox list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxJob {
    /// Unique job id, used for duplicate detection.
    pub id: String,
    /// Free-form job kind.
    pub kind: String,
    /// Job arguments.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Outbox list key for a pool.
pub fn queue_key(pool: &str) -> String {
    format!("queue:{pool}")
}

fn stats_key(pool: &str) -> String {
    format!("stats:{pool}")
}

fn seen_key(id: &str) -> String {
    format!("seen:{id}")
}

/// Build the broker for one configured pool.
pub fn build_broker(pool: &str, config: &PoolConfig, store: Arc<KvStore>) -> Broker<String, KvStore> {
    let queue = queue_key(pool);
    let stats = stats_key(pool);
    let batch_size = config.batch_size.max(1);
    let sink = Arc::clone(&store);

    Broker::new(
        pool,
        store,
        move |ctx, store: Arc<KvStore>| {
            let queue = queue.clone();
            async move { fetch(&ctx, &store, &queue, batch_size).await }
        },
        move |ctx, raw: String| {
            let store = Arc::clone(&sink);
            let stats = stats.clone();
            async move {
                let result = handle(&ctx, &store, &raw).await;
                let field = match &result {
                    Ok(Outcome::Processed) => "processed",
                    Ok(Outcome::Duplicate) => "duplicate",
                    Err(_) => "failed",
                };
                if let Err(e) = store.hincr_by(&stats, field, 1).await {
                    warn!(broker = ctx.broker(), error = %e, "Failed to record job outcome");
                }
                result.map(|_| ())
            }
        },
        BrokerOptions::from(config),
    )
}

async fn fetch(ctx: &JobContext, store: &KvStore, queue: &str, batch_size: usize) -> Batch<String> {
    match store.pop_batch(queue, batch_size).await {
        // A full batch means the list probably holds more.
        Ok(items) if items.len() >= batch_size => Batch::more(items),
        Ok(items) => Batch::last(items),
        Err(e) => {
            warn!(broker = ctx.broker(), error = %e, "Failed to fetch outbox batch");
            Batch::empty()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Processed,
    Duplicate,
}

async fn handle(ctx: &JobContext, store: &KvStore, raw: &str) -> Result<Outcome, BoxError> {
    let job = decode(raw)?;

    if !store.set_nx(&seen_key(&job.id), "1", SEEN_TTL_SECS).await? {
        debug!(broker = ctx.broker(), id = %job.id, "Skipping duplicate job");
        return Ok(Outcome::Duplicate);
    }

    info!(
        broker = ctx.broker(),
        worker = ctx.worker(),
        id = %job.id,
        kind = %job.kind,
        "Processed job"
    );
    Ok(Outcome::Processed)
}

fn decode(raw: &str) -> Result<OutboxJob, BoxError> {
    let job: OutboxJob = serde_json::from_str(raw)?;
    if job.id.is_empty() {
        return Err("outbox job has an empty id".into());
    }
    Ok(job)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_job() {
        let job = decode(r#"{"id":"42","kind":"email","payload":{"to":"a@b.c"}}"#).unwrap();
        assert_eq!(job.id, "42");
        assert_eq!(job.kind, "email");
        assert_eq!(job.payload["to"], "a@b.c");
    }

    #[test]
    fn test_decode_defaults_payload() {
        let job = decode(r#"{"id":"1","kind":"noop"}"#).unwrap();
        assert!(job.payload.is_null());
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"id":"","kind":"noop"}"#).is_err());
    }

    #[test]
    fn test_keys() {
        assert_eq!(queue_key("mail"), "queue:mail");
        assert_eq!(stats_key("mail"), "stats:mail");
        assert_eq!(seen_key("7"), "seen:7");
    }
}
