use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::config::WorkerConfig;
use crate::error::RaceError;
use crate::race::{lock, now_secs};
use crate::race::retry::retry;
use crate::store::{QueueEntry, QUEUE_START, RaceStore, keys};

/// What happened to one queue entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Work done and the token was pushed to every successor.
    Forwarded { token: String, lap: Option<i64> },
    /// The token went past the lap limit and its result was recorded.
    Finished { token: String, lap: i64, elapsed: f64 },
    /// A copy of a token whose result already exists. Nothing recorded.
    Dropped { token: String },
    /// The entry carried no token.
    Skipped { entry: String },
}

/// Consumes one segment's queue: records where each token is, counts laps on
/// the start-goal segment, simulates the time spent in the segment and hands
/// the token to every successor.
pub struct SegmentWorker {
    config: WorkerConfig,
    store: Arc<dyn RaceStore>,
    queue: String,
    last_id: String,
}

impl SegmentWorker {
    pub fn new(config: WorkerConfig, store: Arc<dyn RaceStore>) -> Self {
        let queue = keys::queue(&config.segment_id);
        Self {
            config,
            store,
            queue,
            last_id: QUEUE_START.to_string(),
        }
    }

    pub fn segment_id(&self) -> &str {
        &self.config.segment_id
    }

    /// Process tokens until cancelled. Cancellation is checked between tokens,
    /// while waiting on a lock and while backing off after a store failure.
    /// A visit cancelled at one of those points is abandoned as is.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), RaceError> {
        info!(
            segment = %self.config.segment_id,
            next = ?self.config.next_segments,
            start_goal = self.config.start_goal,
            max_laps = self.config.max_laps,
            "segment worker started"
        );

        loop {
            let entry = match self.receive(&cancel).await {
                Ok(entry) => entry,
                Err(RaceError::Cancelled) => break,
                Err(e) => return Err(e),
            };

            match self.process(entry, &cancel).await {
                Ok(step) => debug!(segment = %self.config.segment_id, ?step, "entry processed"),
                Err(RaceError::Cancelled) => break,
                Err(e) => return Err(e),
            }
        }

        info!(segment = %self.config.segment_id, "segment worker stopped");
        Ok(())
    }

    /// Wait for the next entry after the last one seen.
    pub async fn receive(&mut self, cancel: &CancellationToken) -> Result<QueueEntry, RaceError> {
        let block = self.config.store.block_timeout();
        loop {
            if cancel.is_cancelled() {
                return Err(RaceError::Cancelled);
            }

            let read = {
                let store = &self.store;
                let queue = self.queue.as_str();
                let after = self.last_id.as_str();
                retry("receive", self.config.tuning.backoff(), cancel, || {
                    store.queue_read_after(queue, after, block)
                })
                .await?
            };

            if let Some(entry) = read {
                self.last_id = entry.id.clone();
                return Ok(entry);
            }
        }
    }

    /// One full visit of a token to this segment.
    pub async fn process(&self, entry: QueueEntry, cancel: &CancellationToken) -> Result<Step, RaceError> {
        let segment = self.config.segment_id.as_str();
        let Some(token) = entry.token().map(str::to_string) else {
            warn!(segment, entry = %entry.id, "queue entry has no token, skipping");
            self.remove(&entry.id, cancel).await?;
            return Ok(Step::Skipped { entry: entry.id });
        };

        info!(segment, token = %token, entry = %entry.id, "token received");
        let store = &self.store;
        retry("record location", self.config.tuning.backoff(), cancel, || {
            store.hash_set(keys::LOCATIONS, &token, segment)
        })
        .await?;

        let mut lap = None;
        if self.config.start_goal {
            match self.account_lap(&token, cancel).await? {
                LapOutcome::Running(current) => lap = Some(current),
                LapOutcome::Done(step) => {
                    self.remove(&entry.id, cancel).await?;
                    return Ok(step);
                }
            }
        }

        let spent = self.simulate_work().await;
        let record = format!("{}:{}", segment, spent.as_secs_f64());
        let timings = keys::timings(&token);
        retry("record timing", self.config.tuning.backoff(), cancel, || {
            store.list_append(&timings, &record)
        })
        .await?;
        info!(segment, token = %token, seconds = spent.as_secs_f64(), "segment done");

        for next in &self.config.next_segments {
            self.forward(&token, next, cancel).await?;
        }

        self.remove(&entry.id, cancel).await?;
        Ok(Step::Forwarded { token, lap })
    }

    async fn account_lap(&self, token: &str, cancel: &CancellationToken) -> Result<LapOutcome, RaceError> {
        let store = &self.store;
        let backoff = || self.config.tuning.backoff();

        let finished = retry("read result", backoff(), cancel, || {
            store.hash_get(keys::RESULTS, token)
        })
        .await?;
        if finished.is_some() {
            warn!(token, "token already finished, dropping copy");
            return Ok(LapOutcome::Done(Step::Dropped { token: token.to_string() }));
        }

        // The seed visit only starts the clock; laps are counted on each return.
        let now = now_secs().to_string();
        let first = retry("record start", backoff(), cancel, || {
            store.hash_set_if_absent(keys::START_TIMES, token, &now)
        })
        .await?;
        if first {
            retry("init lap", backoff(), cancel, || store.hash_set(keys::LAPS, token, "0")).await?;
            info!(token, "token started");
            return Ok(LapOutcome::Running(0));
        }

        let lap = retry("count lap", backoff(), cancel, || {
            store.hash_increment(keys::LAPS, token, 1)
        })
        .await?;
        info!(token, lap, "lap completed");
        if lap <= i64::from(self.config.max_laps) {
            return Ok(LapOutcome::Running(lap));
        }

        let started = retry("read start", backoff(), cancel, || {
            store.hash_get(keys::START_TIMES, token)
        })
        .await?;
        let elapsed = match started.as_deref().map(str::parse::<f64>) {
            Some(Ok(start)) => (now_secs() - start).max(0.0),
            _ => {
                warn!(token, start = ?started, "start time missing or invalid");
                0.0
            }
        };

        let elapsed_str = elapsed.to_string();
        let recorded = retry("record result", backoff(), cancel, || {
            store.hash_set_if_absent(keys::RESULTS, token, &elapsed_str)
        })
        .await?;
        if !recorded {
            warn!(token, "another copy finished first, dropping");
            return Ok(LapOutcome::Done(Step::Dropped { token: token.to_string() }));
        }

        let finished = retry("count finished", backoff(), cancel, || {
            store.counter_increment(keys::FINISHED)
        })
        .await?;
        info!(token, lap, elapsed, finished, "token finished the race");
        Ok(LapOutcome::Done(Step::Finished {
            token: token.to_string(),
            lap,
            elapsed,
        }))
    }

    async fn simulate_work(&self) -> Duration {
        let min = self.config.tuning.work_delay_min_ms;
        let max = self.config.tuning.work_delay_max_ms.max(min);
        let delay = Duration::from_millis(rand::thread_rng().gen_range(min..=max));
        let started = Instant::now();
        tokio::time::sleep(delay).await;
        started.elapsed()
    }

    /// Push the token onto `next`'s queue while holding `next`'s lock.
    /// The lock is released here, right after the enqueue.
    async fn forward(&self, token: &str, next: &str, cancel: &CancellationToken) -> Result<(), RaceError> {
        let tuning = &self.config.tuning;
        let guard = lock::acquire(
            self.store.clone(),
            &keys::lock(next),
            tuning.lock_ttl(),
            tuning.backoff(),
            cancel,
        )
        .await?;

        let store = &self.store;
        let queue = keys::queue(next);
        let queued = retry("forward", tuning.backoff(), cancel, || store.queue_append(&queue, token)).await;

        if let Err(e) = guard.release().await {
            warn!(lock = %keys::lock(next), error = %e, "failed to release lock, leaving it to expire");
        }
        queued?;

        info!(segment = %self.config.segment_id, token, next, "token forwarded");
        Ok(())
    }

    async fn remove(&self, id: &str, cancel: &CancellationToken) -> Result<(), RaceError> {
        let store = &self.store;
        let queue = self.queue.as_str();
        retry("remove entry", self.config.tuning.backoff(), cancel, || {
            store.queue_remove(queue, id)
        })
        .await
    }
}

enum LapOutcome {
    Running(i64),
    Done(Step),
}
