use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use crate::config::Backoff;
use crate::error::RaceError;
use crate::store::RaceStore;

/// An advisory lock held in the shared store.
///
/// Whoever acquires the lock releases it: call [`LockGuard::release`] once the
/// critical section is done. If the holder dies, the expiry frees the key.
#[must_use = "a held lock must be released"]
pub struct LockGuard {
    store: Arc<dyn RaceStore>,
    key: String,
    owner: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Delete the lock key if this guard still owns it.
    /// A lock that already expired is reported, not treated as an error.
    pub async fn release(self) -> Result<(), RaceError> {
        let released = self.store.unlock(&self.key, &self.owner).await?;
        if !released {
            warn!(lock = %self.key, "lock expired before release");
        }
        Ok(())
    }
}

/// Spin on an atomic try-acquire until the lock is ours.
///
/// There is no overall deadline; the wait between attempts grows up to the
/// backoff cap. Store errors count as a failed attempt.
pub async fn acquire(
    store: Arc<dyn RaceStore>,
    key: &str,
    ttl: Duration,
    mut backoff: Backoff,
    cancel: &CancellationToken,
) -> Result<LockGuard, RaceError> {
    let owner = Uuid::new_v4().to_string();
    loop {
        match store.try_lock(key, &owner, ttl).await {
            Ok(true) => {
                debug!(lock = key, owner = %owner, "lock acquired");
                return Ok(LockGuard {
                    store,
                    key: key.to_string(),
                    owner,
                });
            }
            Ok(false) => {}
            Err(e) => warn!(lock = key, error = %e, "lock attempt failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(RaceError::Cancelled),
            _ = tokio::time::sleep(backoff.next_delay()) => {}
        }
    }
}
