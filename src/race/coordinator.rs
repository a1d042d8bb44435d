use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use crate::config::RaceConfig;
use crate::deploy::{Deployer, WorkerSpec};
use crate::error::RaceError;
use crate::race::report::{RaceReport, TokenReport};
use crate::store::{RaceStore, keys};
use crate::track::{self, TrackDefinition};

/// Finished-token count against the number of tokens seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceStatus {
    pub finished: i64,
    pub expected: i64,
}

impl RaceStatus {
    pub fn is_complete(&self) -> bool {
        self.finished >= self.expected
    }
}

/// Drives one race: reset, provision, seed, watch, report, tear down.
pub struct RaceCoordinator<D: Deployer> {
    config: RaceConfig,
    store: Arc<dyn RaceStore>,
    deployer: D,
    workers: Vec<String>,
}

impl<D: Deployer> RaceCoordinator<D> {
    pub fn new(config: RaceConfig, store: Arc<dyn RaceStore>, deployer: D) -> Self {
        Self {
            config,
            store,
            deployer,
            workers: Vec::new(),
        }
    }

    pub fn deployer(&self) -> &D {
        &self.deployer
    }

    /// Names of the workers this coordinator has started and not yet stopped.
    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    /// Token ids the race will seed, in track order.
    pub fn expected_tokens(&self, definition: &TrackDefinition) -> Vec<String> {
        definition
            .tracks
            .iter()
            .filter_map(|t| t.start_segment())
            .flat_map(|start| {
                (1..=self.config.tokens_per_track).map(move |seq| keys::token_id(&start.segment_id, seq))
            })
            .collect()
    }

    pub fn total_expected(&self, definition: &TrackDefinition) -> i64 {
        (definition.tracks.len() * self.config.tokens_per_track) as i64
    }

    pub fn load_topology(&self) -> Result<TrackDefinition, RaceError> {
        let definition = track::load_validated(&self.config.tracks_file)?;
        info!(
            file = %self.config.tracks_file.display(),
            tracks = definition.tracks.len(),
            segments = definition.all_segments().len(),
            "topology loaded"
        );
        Ok(definition)
    }

    /// Clear everything a previous race may have left behind and zero the
    /// finished counter. Must run before any token is seeded.
    pub async fn initialize(&self, definition: &TrackDefinition) -> Result<(), RaceError> {
        let mut stale = vec![
            keys::LOCATIONS.to_string(),
            keys::LAPS.to_string(),
            keys::START_TIMES.to_string(),
            keys::RESULTS.to_string(),
        ];
        stale.extend(self.expected_tokens(definition).iter().map(|t| keys::timings(t)));
        for segment in definition.all_segments() {
            stale.push(keys::queue(&segment.segment_id));
            stale.push(keys::lock(&segment.segment_id));
        }

        self.store.delete(&stale).await?;
        self.store.counter_set(keys::FINISHED, 0).await?;
        info!(cleared = stale.len(), "race state reset");
        Ok(())
    }

    /// Start one worker per distinct segment. On the first failure every worker
    /// started so far is stopped again and the error is returned.
    pub async fn provision(&mut self, definition: &TrackDefinition) -> Result<(), RaceError> {
        for segment in definition.all_segments() {
            let spec = WorkerSpec {
                segment_id: segment.segment_id.clone(),
                next_segments: segment.next_segments.clone(),
                start_goal: segment.is_start_goal(),
                max_laps: self.config.max_laps,
                store: self.config.store.clone(),
                tuning: self.config.worker.clone(),
            };
            match self.deployer.start_worker(&spec).await {
                Ok(name) => self.workers.push(name),
                Err(e) => {
                    error!(segment = %segment.segment_id, error = %e, "provisioning failed, aborting race");
                    self.stop_workers().await;
                    return Err(e.into());
                }
            }
        }
        info!(workers = self.workers.len(), "workers provisioned");
        Ok(())
    }

    /// Put `tokens_per_track` fresh tokens on every start-goal queue.
    pub async fn seed(&self, definition: &TrackDefinition) -> Result<Vec<String>, RaceError> {
        let mut seeded = Vec::new();
        for track in &definition.tracks {
            let Some(start) = track.start_segment() else {
                continue;
            };
            for seq in 1..=self.config.tokens_per_track {
                let token = keys::token_id(&start.segment_id, seq);
                self.store.queue_append(&keys::queue(&start.segment_id), &token).await?;
                info!(track = %track.track_id, token = %token, segment = %start.segment_id, "token seeded");
                seeded.push(token);
            }
        }
        Ok(seeded)
    }

    /// Watch the race for the configured window. Store errors are logged and
    /// the next poll goes ahead regardless.
    pub async fn monitor(&self, expected: i64, cancel: &CancellationToken) -> RaceStatus {
        let monitor = &self.config.monitor;
        let deadline = Instant::now() + monitor.window();
        let mut status = RaceStatus { finished: 0, expected };

        info!(window = ?monitor.window(), expected, "monitoring race");
        loop {
            match self.store.hash_get_all(keys::LOCATIONS).await {
                Ok(locations) => {
                    let locations: BTreeMap<_, _> = locations.into_iter().collect();
                    info!(?locations, "token locations");
                }
                Err(e) => warn!(error = %e, "could not read token locations"),
            }
            match self.store.counter_get(keys::FINISHED).await {
                Ok(finished) => status.finished = finished,
                Err(e) => warn!(error = %e, "could not read finished counter"),
            }

            if monitor.stop_on_completion && status.is_complete() {
                info!(finished = status.finished, "all tokens finished");
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = monitor.poll_interval().min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("monitoring cancelled");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!(finished = status.finished, expected, "monitoring window over");
        status
    }

    /// Build the per-token timing report. Bad entries are kept on the token's
    /// report and logged; they never stop the other tokens from being reported.
    pub async fn aggregate(&self, definition: &TrackDefinition, status: RaceStatus) -> RaceReport {
        let mut report = RaceReport {
            tokens: Vec::new(),
            finished: status.finished,
            expected: status.expected,
        };

        for token in self.expected_tokens(definition) {
            let mut token_report = match self.store.list_range(&keys::timings(&token)).await {
                Ok(entries) => TokenReport::from_entries(&token, &entries),
                Err(e) => {
                    warn!(token = %token, error = %e, "could not read timing log");
                    TokenReport::unreadable(&token, e.to_string())
                }
            };
            for raw in &token_report.malformed {
                warn!(token = %token, entry = %raw, "unparseable timing entry");
            }

            token_report.finish_time = match self.store.hash_get(keys::RESULTS, &token).await {
                Ok(value) => value.and_then(|v| v.parse().ok()),
                Err(e) => {
                    warn!(token = %token, error = %e, "could not read finish time");
                    None
                }
            };

            info!(
                token = %token,
                segments = token_report.records.len(),
                total = token_report.total(),
                race_time = ?token_report.finish_time,
                "token aggregated"
            );
            report.tokens.push(token_report);
        }
        report
    }

    async fn stop_workers(&mut self) {
        for name in std::mem::take(&mut self.workers) {
            if let Err(e) = self.deployer.stop_worker(&name).await {
                warn!(worker = %name, error = %e, "failed to stop worker");
            }
        }
    }

    /// Stop every worker, then the store. Failures are logged; teardown goes on.
    pub async fn teardown(&mut self) {
        self.stop_workers().await;
        if let Err(e) = self.deployer.stop_store().await {
            warn!(error = %e, "failed to stop store");
        }
        info!("teardown complete");
    }

    /// The whole race. Topology, reset and provisioning errors abort before any
    /// token is seeded. Once provisioning succeeded, monitoring, aggregation
    /// and teardown always run.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RaceReport, RaceError> {
        let definition = match self.load_topology() {
            Ok(definition) => definition,
            Err(e) => {
                self.teardown().await;
                return Err(e);
            }
        };
        let expected = self.total_expected(&definition);

        if let Err(e) = self.initialize(&definition).await {
            self.teardown().await;
            return Err(e);
        }
        if let Err(e) = self.provision(&definition).await {
            self.teardown().await;
            return Err(e);
        }

        if let Err(e) = self.seed(&definition).await {
            error!(error = %e, "seeding failed");
        }

        let status = self.monitor(expected, cancel).await;
        let report = self.aggregate(&definition, status).await;
        for flagged in report.flagged() {
            warn!(token = %flagged.token, "token log could not be fully parsed");
        }
        let written = report.write_to(&self.config.results_file);

        self.teardown().await;

        written?;
        info!(
            file = %self.config.results_file.display(),
            finished = status.finished,
            expected,
            "race results written"
        );
        Ok(report)
    }
}
