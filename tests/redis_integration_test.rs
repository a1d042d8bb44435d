use relay_race::config::{Backoff, StoreConfig, WorkerConfig, WorkerTuning};
use relay_race::race::SegmentWorker;
use relay_race::store::{QUEUE_START, RaceStore, RedisRaceStore, keys};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// Local redis, overridable with RACE_REDIS_URL.
fn redis_url() -> String {
    std::env::var("RACE_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/6".to_string())
}

async fn connect() -> RedisRaceStore {
    RedisRaceStore::connect_with_retry(
        &redis_url(),
        3,
        Backoff::new(Duration::from_millis(100), Duration::from_millis(500)),
    )
    .await
    .expect("Failed to connect to Redis")
}

#[tokio::test]
#[ignore] // Needs a running redis
async fn test_redis_primitives() {
    let store = connect().await;
    let queue = "stream-it-primitives";
    let lock = "lock:it-primitives";
    store
        .delete(&[queue.to_string(), lock.to_string(), "it-hash".to_string(), "it-counter".to_string()])
        .await
        .expect("cleanup");

    // 1. Streams
    let id = store.queue_append(queue, "tok").await.expect("xadd");
    let entry = store
        .queue_read_after(queue, QUEUE_START, Duration::from_millis(100))
        .await
        .expect("xread")
        .expect("entry");
    assert_eq!(entry.id, id);
    assert_eq!(entry.token(), Some("tok"));
    store.queue_remove(queue, &id).await.expect("xdel");
    let empty = store
        .queue_read_after(queue, QUEUE_START, Duration::from_millis(50))
        .await
        .expect("xread");
    assert!(empty.is_none());

    // 2. Hashes and counters
    assert!(store.hash_set_if_absent("it-hash", "f", "1").await.unwrap());
    assert!(!store.hash_set_if_absent("it-hash", "f", "2").await.unwrap());
    assert_eq!(store.hash_increment("it-hash", "n", 2).await.unwrap(), 2);
    assert_eq!(store.counter_get("it-counter").await.unwrap(), 0);
    assert_eq!(store.counter_increment("it-counter").await.unwrap(), 1);

    // 3. Locks
    assert!(store.try_lock(lock, "a", Duration::from_secs(5)).await.unwrap());
    assert!(!store.try_lock(lock, "b", Duration::from_secs(5)).await.unwrap());
    assert!(!store.unlock(lock, "b").await.unwrap());
    assert!(store.unlock(lock, "a").await.unwrap());
}

#[tokio::test]
#[ignore] // Needs a running redis
async fn test_redis_self_loop_race() {
    let store = Arc::new(connect().await);
    let segment = "start-and-goal-it";
    let token = keys::token_id(segment, 1);
    store
        .delete(&[
            keys::queue(segment),
            keys::lock(segment),
            keys::LOCATIONS.to_string(),
            keys::LAPS.to_string(),
            keys::START_TIMES.to_string(),
            keys::RESULTS.to_string(),
            keys::timings(&token),
        ])
        .await
        .expect("cleanup");
    store.counter_set(keys::FINISHED, 0).await.expect("reset counter");

    let config = WorkerConfig::new(segment, vec![segment.to_string()])
        .max_laps(2)
        .store(StoreConfig {
            block_timeout_ms: 50,
            ..StoreConfig::default()
        })
        .tuning(WorkerTuning::fast());
    let cancel = CancellationToken::new();
    let mut worker = SegmentWorker::new(config, store.clone());
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    store.queue_append(&keys::queue(segment), &token).await.expect("seed");

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if store.counter_get(keys::FINISHED).await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    cancel.cancel();
    handle.await.expect("join").expect("worker");

    assert!(finished.is_ok(), "token did not finish");
    assert!(store.hash_get(keys::RESULTS, &token).await.unwrap().is_some());
    assert_eq!(store.list_range(&keys::timings(&token)).await.unwrap().len(), 3);
}
