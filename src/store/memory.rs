use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use crate::error::StoreError;
use crate::store::{QueueEntry, RaceStore, keys};

/// In-process store with the same semantics as the redis one.
/// Used for standalone races and tests.
#[derive(Default)]
pub struct MemoryRaceStore {
    // Map<QueueKey, Map<Seq, Fields>>
    queues: DashMap<String, BTreeMap<u64, HashMap<String, String>>>,
    notifiers: DashMap<String, Arc<Notify>>,
    next_seq: AtomicU64,
    hashes: DashMap<String, DashMap<String, String>>,
    counters: DashMap<String, i64>,
    lists: DashMap<String, Vec<String>>,
    // Map<LockKey, (Owner, Expiry)>
    locks: DashMap<String, (String, Instant)>,
    failures: AtomicUsize,
}

impl MemoryRaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` store calls fail as if the store were unreachable.
    pub fn inject_failures(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Append an entry with arbitrary fields, e.g. one without a token.
    pub fn push_raw(&self, queue: &str, fields: HashMap<String, String>) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.queues.entry(queue.to_string()).or_default().insert(seq, fields);
        self.notifier(queue).notify_waiters();
        format!("{}-0", seq)
    }

    /// Entries still waiting in a queue.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.queues.get(queue).map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map(|l| l.value().1 > Instant::now())
            .unwrap_or(false)
    }

    fn check(&self) -> Result<(), StoreError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    fn notifier(&self, queue: &str) -> Arc<Notify> {
        self.notifiers
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .value()
            .clone()
    }

    fn first_after(&self, queue: &str, after: u64) -> Option<QueueEntry> {
        let entries = self.queues.get(queue)?;
        entries
            .range((Bound::Excluded(after), Bound::Unbounded))
            .next()
            .map(|(seq, fields)| QueueEntry {
                id: format!("{}-0", seq),
                fields: fields.clone(),
            })
    }
}

fn parse_seq(id: &str) -> Result<u64, StoreError> {
    id.split('-')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::InvalidValue {
            key: "entry id".to_string(),
            value: id.to_string(),
        })
}

#[async_trait]
impl RaceStore for MemoryRaceStore {
    async fn queue_append(&self, queue: &str, token: &str) -> Result<String, StoreError> {
        self.check()?;
        let fields = HashMap::from([(keys::TOKEN_FIELD.to_string(), token.to_string())]);
        Ok(self.push_raw(queue, fields))
    }

    async fn queue_read_after(
        &self,
        queue: &str,
        after: &str,
        block: Duration,
    ) -> Result<Option<QueueEntry>, StoreError> {
        self.check()?;
        let after = parse_seq(after)?;
        let notify = self.notifier(queue);
        let deadline = Instant::now() + block;

        loop {
            // Register interest before looking, so an append in between is not missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.first_after(queue, after) {
                return Ok(Some(entry));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn queue_remove(&self, queue: &str, id: &str) -> Result<(), StoreError> {
        self.check()?;
        let seq = parse_seq(id)?;
        if let Some(mut entries) = self.queues.get_mut(queue) {
            entries.remove(&seq);
        }
        Ok(())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        let hash = self.hashes.entry(key.to_string()).or_default();
        hash.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        self.check()?;
        let hash = self.hashes.entry(key.to_string()).or_default();
        let written = match hash.entry(field.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                true
            }
        };
        Ok(written)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self
            .hashes
            .get(key)
            .and_then(|h| h.get(field).map(|v| v.value().clone())))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        let mut map = HashMap::new();
        if let Some(hash) = self.hashes.get(key) {
            for item in hash.iter() {
                map.insert(item.key().clone(), item.value().clone());
            }
        }
        Ok(map)
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.check()?;
        let hash = self.hashes.entry(key.to_string()).or_default();
        let mut slot = hash.entry(field.to_string()).or_insert_with(|| "0".to_string());
        let current: i64 = slot.parse().map_err(|_| StoreError::InvalidValue {
            key: format!("{}.{}", key, field),
            value: slot.clone(),
        })?;
        let next = current + delta;
        *slot = next.to_string();
        Ok(next)
    }

    async fn counter_set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.check()?;
        self.counters.insert(key.to_string(), value);
        Ok(())
    }

    async fn counter_increment(&self, key: &str) -> Result<i64, StoreError> {
        self.check()?;
        let mut counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn counter_get(&self, key: &str) -> Result<i64, StoreError> {
        self.check()?;
        Ok(self.counters.get(key).map(|c| *c).unwrap_or(0))
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.lists.entry(key.to_string()).or_default().push(value.to_string());
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self.lists.get(key).map(|l| l.value().clone()).unwrap_or_default())
    }

    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        let now = Instant::now();
        let acquired = match self.locks.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut held) => {
                if held.get().1 <= now {
                    held.insert((owner.to_string(), now + ttl));
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert((owner.to_string(), now + ttl));
                true
            }
        };
        Ok(acquired)
    }

    async fn unlock(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.locks.remove_if(key, |_, (holder, _)| holder == owner).is_some())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        self.check()?;
        for key in keys {
            self.queues.remove(key);
            self.hashes.remove(key);
            self.counters.remove(key);
            self.lists.remove(key);
            self.locks.remove(key);
        }
        Ok(())
    }
}
