//! Redis integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Set `REDIS_URL` environment variable to point to your Redis instance.
//! Default: <redis://localhost:6379>

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jobkit_queue::{Batch, BoxError, Broker, BrokerOptions, KvStore, Server, StoreOptions};

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

async fn connect(prefix: &str) -> KvStore {
    let options = StoreOptions::new(get_redis_url()).with_prefix(prefix);
    KvStore::connect(&options)
        .await
        .expect("Failed to connect to Redis")
}

/// Test that we can connect to Redis.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_connection() {
    let options = StoreOptions::new(get_redis_url());
    let store = KvStore::connect(&options).await;
    assert!(store.is_ok(), "Failed to connect to Redis: {:?}", store.err());
}

/// Test string, TTL and counter operations.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_strings_and_counters() {
    let store = connect("jobkit-test:strings").await;
    store.del(&["greeting", "counter", "once"]).await.expect("del");

    store.set_ex("greeting", "hello", 60).await.expect("set_ex");
    assert_eq!(store.get("greeting").await.expect("get"), Some("hello".to_string()));
    assert!(store.ttl("greeting").await.expect("ttl") > 0);

    assert!(!store.set_keep_ttl("greeting", "hi").await.expect("set_keep_ttl"));
    assert_eq!(store.get("greeting").await.expect("get"), Some("hi".to_string()));
    assert!(store.set_keep_ttl("missing", "x").await.expect("set_keep_ttl"));

    assert!(store.set_nx("once", "1", 60).await.expect("set_nx"));
    assert!(!store.set_nx("once", "2", 60).await.expect("set_nx"));

    assert_eq!(store.incr("counter").await.expect("incr"), 1);
    assert_eq!(store.incr_by("counter", 4).await.expect("incr_by"), 5);
    assert_eq!(store.decr("counter").await.expect("decr"), 4);
    assert_eq!(store.get_int("counter").await.expect("get_int"), Some(4));

    store.quit().await.expect("Failed to quit");
}

/// Test multi-key reads and writes.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_multi_key() {
    let store = connect("jobkit-test:multi").await;
    store.del(&["a", "b", "c"]).await.expect("del");

    let values = HashMap::from([
        ("a".to_string(), "1".to_string()),
        ("b".to_string(), "2".to_string()),
    ]);
    store.mset(values).await.expect("mset");

    let found = store.mget(&["a", "b", "c"]).await.expect("mget");
    assert_eq!(found.len(), 2);
    assert_eq!(found.get("a"), Some(&"1".to_string()));
    assert_eq!(found.get("b"), Some(&"2".to_string()));
    assert!(!found.contains_key("c"));

    // Keys are written under the prefix.
    assert_eq!(store.get("a").await.expect("get"), Some("1".to_string()));

    store.quit().await.expect("Failed to quit");
}

/// Test set operations.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_sets() {
    let store = connect("jobkit-test:sets").await;
    store.del(&["workers"]).await.expect("del");

    let members = vec!["w1".to_string(), "w2".to_string(), "w3".to_string()];
    assert_eq!(store.sadd("workers", members).await.expect("sadd"), 3);
    assert_eq!(store.sadd("workers", vec!["w1".to_string()]).await.expect("sadd"), 0);
    assert_eq!(store.scard("workers").await.expect("scard"), 3);
    assert!(store.sismember("workers", "w2").await.expect("sismember"));

    let picked = store.srand_members("workers", 2).await.expect("srandmember");
    assert_eq!(picked.len(), 2);
    assert_ne!(picked[0], picked[1]);

    assert_eq!(store.srem("workers", vec!["w2".to_string()]).await.expect("srem"), 1);
    let mut left = store.smembers("workers").await.expect("smembers");
    left.sort();
    assert_eq!(left, vec!["w1", "w3"]);

    store.quit().await.expect("Failed to quit");
}

/// Test sorted set operations.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_sorted_sets() {
    let store = connect("jobkit-test:zsets").await;
    store.del(&["delayed"]).await.expect("del");

    let members = vec![
        (10.0, "a".to_string()),
        (20.0, "b".to_string()),
        (30.0, "c".to_string()),
        (40.0, "d".to_string()),
    ];
    assert_eq!(store.zadd("delayed", members).await.expect("zadd"), 4);
    assert_eq!(store.zcard("delayed").await.expect("zcard"), 4);
    assert_eq!(store.zscore("delayed", "b").await.expect("zscore"), Some(20.0));
    assert_eq!(store.zscore("delayed", "z").await.expect("zscore"), None);

    let top = store
        .zrev_range_by_score("delayed", 35.0, 0.0, 0, 2)
        .await
        .expect("zrevrangebyscore");
    assert_eq!(top, vec!["c", "b"]);

    assert_eq!(
        store.zrem_range_by_score("delayed", 0.0, 20.0).await.expect("zremrangebyscore"),
        2
    );
    assert_eq!(store.zcard("delayed").await.expect("zcard"), 2);

    store.quit().await.expect("Failed to quit");
}

/// Test bitmap operations.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_bitmaps() {
    let store = connect("jobkit-test:bits").await;
    store.del(&["seen", "counters"]).await.expect("del");

    assert!(!store.setbit("seen", 7, true).await.expect("setbit"));
    assert!(store.setbit("seen", 7, true).await.expect("setbit"));
    assert!(!store.setbit("seen", 9, true).await.expect("setbit"));

    assert!(store.getbit("seen", 7).await.expect("getbit"));
    assert!(!store.getbit("seen", 8).await.expect("getbit"));
    assert!(!store.getbit("missing", 0).await.expect("getbit"));

    assert_eq!(store.bitcount("seen", None).await.expect("bitcount"), 2);
    assert_eq!(store.bitcount("seen", Some((0, 0))).await.expect("bitcount"), 1);
    assert_eq!(store.bitpos("seen", true).await.expect("bitpos"), 7);

    let replies = store
        .bitfield("counters", &["INCRBY", "u8", "0", "5", "GET", "u8", "0"])
        .await
        .expect("bitfield");
    assert_eq!(replies, vec![Some(5), Some(5)]);

    store.quit().await.expect("Failed to quit");
}

/// Test hash operations.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_hashes() {
    let store = connect("jobkit-test:hashes").await;
    store.del(&["job:1"]).await.expect("del");

    let fields = HashMap::from([
        ("state".to_string(), "queued".to_string()),
        ("attempts".to_string(), "0".to_string()),
    ]);
    assert_eq!(store.hset("job:1", fields).await.expect("hset"), 2);
    assert_eq!(store.hincr_by("job:1", "attempts", 1).await.expect("hincrby"), 1);
    assert!(store.hexists("job:1", "state").await.expect("hexists"));
    assert_eq!(
        store.hget("job:1", "state").await.expect("hget"),
        Some("queued".to_string())
    );

    let all = store.hgetall("job:1").await.expect("hgetall");
    assert_eq!(all.len(), 2);

    assert_eq!(store.hget_int("job:1", "attempts").await.expect("hget_int"), Some(1));
    let picked = store.hmget("job:1", &["state", "missing"]).await.expect("hmget");
    assert_eq!(picked.len(), 1);
    assert_eq!(picked.get("state"), Some(&"queued".to_string()));

    assert_eq!(store.hdel("job:1", &["state"]).await.expect("hdel"), 1);
    assert_eq!(store.hkeys("job:1").await.expect("hkeys"), vec!["attempts"]);

    store.quit().await.expect("Failed to quit");
}

/// Test a broker draining a Redis list end to end.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_broker_drains_redis_list() {
    let store = Arc::new(connect("jobkit-test:list").await);
    store.del(&["queue", "done"]).await.expect("del");

    let items: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    store.lpush("queue", items).await.expect("lpush");

    let broker = Arc::new(Broker::new(
        "redis-list",
        Arc::clone(&store),
        |_ctx, store: Arc<KvStore>| async move {
            match store.pop_batch("queue", 5).await {
                Ok(items) if items.is_empty() => Batch::empty(),
                Ok(items) => Batch::more(items),
                Err(_) => Batch::empty(),
            }
        },
        |_ctx, item: String| async move {
            let _ = item.parse::<u32>()?;
            Ok::<(), BoxError>(())
        },
        BrokerOptions::default()
            .with_queue_len(4)
            .with_consumer_num(2)
            .with_idle_interval(Duration::from_millis(20)),
    ));

    let mut server = Server::new("redis-list");
    server.register(Arc::clone(&broker)).expect("register");
    server.start().await.expect("start");

    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.stats().processed < 20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("broker did not drain the list");

    server.stop().await.expect("stop");
    assert_eq!(store.llen("queue").await.expect("llen"), 0);
    assert_eq!(broker.stats().fetched, 20);

    store.quit().await.expect("Failed to quit");
}
