pub mod keys;
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use crate::error::StoreError;

pub use memory::MemoryRaceStore;
pub use redis_store::RedisRaceStore;

/// Stream id meaning "from the very beginning".
pub const QUEUE_START: &str = "0-0";

/// One entry read from a segment queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl QueueEntry {
    pub fn token(&self) -> Option<&str> {
        self.fields
            .get(keys::TOKEN_FIELD)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }
}

/// The primitives every component uses to coordinate. Nothing else is shared.
#[async_trait]
pub trait RaceStore: Send + Sync {
    // --- ordered per-segment queues ---

    /// Append a token to a queue. Returns the new entry id.
    async fn queue_append(&self, queue: &str, token: &str) -> Result<String, StoreError>;

    /// The first entry with an id greater than `after`, waiting up to `block`
    /// for one to arrive. `Ok(None)` means the wait timed out.
    async fn queue_read_after(
        &self,
        queue: &str,
        after: &str,
        block: Duration,
    ) -> Result<Option<QueueEntry>, StoreError>;

    /// Remove an entry. Removing an entry twice is not an error.
    async fn queue_remove(&self, queue: &str, id: &str) -> Result<(), StoreError>;

    // --- hashes ---

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Returns true when the field was absent and has been written.
    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    // --- counters ---

    async fn counter_set(&self, key: &str, value: i64) -> Result<(), StoreError>;

    async fn counter_increment(&self, key: &str) -> Result<i64, StoreError>;

    /// A counter that was never written reads as zero.
    async fn counter_get(&self, key: &str) -> Result<i64, StoreError>;

    // --- append-only lists ---

    async fn list_append(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    // --- advisory locks ---

    /// Atomic set-if-absent with expiry. True when `owner` now holds the lock.
    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Release the lock only if `owner` still holds it. True when released.
    async fn unlock(&self, key: &str, owner: &str) -> Result<bool, StoreError>;

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;
}
