use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use crate::config::Backoff;
use crate::error::{RaceError, StoreError};

/// Run a store operation until it succeeds, backing off between attempts.
///
/// Only cancellation ends the loop early. Each failure is logged with `what`
/// so a stuck worker shows which step it is stuck on.
pub async fn retry<T, F, Fut>(
    what: &str,
    mut backoff: Backoff,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RaceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(step = what, error = %e, retry_in = ?delay, "store call failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RaceError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
