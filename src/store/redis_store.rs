use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;
use crate::config::Backoff;
use crate::error::StoreError;
use crate::store::{QueueEntry, RaceStore, keys};

const UNLOCK_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

/// Redis-backed store. Queues are streams, locks are `SET NX PX` keys.
pub struct RedisRaceStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    // Blocking reads get their own connection so they never stall other commands.
    blocking: Mutex<Option<MultiplexedConnection>>,
    unlock: redis::Script,
}

impl RedisRaceStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(None),
            unlock: redis::Script::new(UNLOCK_SCRIPT),
        })
    }

    /// Connect, retrying while the server is still coming up.
    pub async fn connect_with_retry(url: &str, attempts: u32, mut backoff: Backoff) -> Result<Self, StoreError> {
        let mut attempt = 1;
        loop {
            match Self::connect(url).await {
                Ok(store) => return Ok(store),
                Err(e) if attempt < attempts => {
                    let delay = backoff.next_delay();
                    warn!(url, attempt, error = %e, retry_in = ?delay, "store not reachable yet");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    async fn blocking_conn(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut slot = self.blocking.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl RaceStore for RedisRaceStore {
    async fn queue_append(&self, queue: &str, token: &str) -> Result<String, StoreError> {
        let mut conn = self.conn();
        let id: String = conn.xadd(queue, "*", &[(keys::TOKEN_FIELD, token)]).await?;
        Ok(id)
    }

    async fn queue_read_after(
        &self,
        queue: &str,
        after: &str,
        block: Duration,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let mut conn = self.blocking_conn().await?;
        let options = StreamReadOptions::default()
            .block(block.as_millis().max(1) as usize)
            .count(1);
        let reply: Option<StreamReadReply> = match conn.xread_options(&[queue], &[after], &options).await {
            Ok(reply) => reply,
            Err(e) => {
                // Drop the connection so the next read reconnects.
                *self.blocking.lock().await = None;
                return Err(e.into());
            }
        };

        let entry = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
            .map(|stream_id| {
                let fields = stream_id
                    .map
                    .iter()
                    .filter_map(|(k, v)| {
                        redis::from_redis_value::<String>(v)
                            .ok()
                            .map(|s| (k.clone(), s))
                    })
                    .collect();
                QueueEntry {
                    id: stream_id.id,
                    fields,
                }
            });
        Ok(entry)
    }

    async fn queue_remove(&self, queue: &str, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.xdel(queue, &[id]).await?;
        Ok(())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let written: bool = conn.hset_nx(key, field, value).await?;
        Ok(written)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(map)
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        let value: i64 = conn.hincr(key, field, delta).await?;
        Ok(value)
    }

    async fn counter_set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn counter_increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn counter_get(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            None => Ok(0),
            Some(s) => s.parse().map_err(|_| StoreError::InvalidValue {
                key: key.to_string(),
                value: s,
            }),
        }
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let values: Vec<String> = conn.lrange(key, 0, -1).await?;
        Ok(values)
    }

    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = self
            .unlock
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let _: i64 = conn.del(keys).await?;
        Ok(())
    }
}
