use async_trait::async_trait;
use relay_race::config::{MonitorConfig, RaceConfig, StoreConfig, WorkerTuning};
use relay_race::deploy::{Deployer, LocalDeployer, WorkerSpec};
use relay_race::error::{DeployError, RaceError, TrackError};
use relay_race::race::{RaceCoordinator, RaceStatus};
use relay_race::store::{MemoryRaceStore, RaceStore, keys};
use relay_race::track::generator;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn race_config(dir: &Path, window_secs: u64, stop_on_completion: bool) -> RaceConfig {
    RaceConfig {
        tracks_file: dir.join("tracks.json"),
        results_file: dir.join("race_results.txt"),
        tokens_per_track: 1,
        max_laps: 1,
        monitor: MonitorConfig {
            window_secs,
            poll_interval_ms: 10,
            stop_on_completion,
        },
        store: StoreConfig {
            block_timeout_ms: 20,
            ..StoreConfig::default()
        },
        worker: WorkerTuning::fast(),
        ..RaceConfig::default()
    }
}

#[tokio::test]
async fn test_local_race_writes_results() {
    // 1. Two circular tracks on disk.
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let definition = generator::generate_circular(2, 3).expect("generate");
    definition.write_json(&temp_dir.path().join("tracks.json")).expect("write tracks");
    let config = race_config(temp_dir.path(), 20, true);

    // 2. Run the race in process.
    let store: Arc<dyn RaceStore> = Arc::new(MemoryRaceStore::new());
    let deployer = LocalDeployer::new(store.clone());
    let mut coordinator = RaceCoordinator::new(config.clone(), store.clone(), deployer);
    let report = coordinator
        .run(&CancellationToken::new())
        .await
        .expect("race should complete");

    // 3. Every token finished and every worker is gone.
    assert_eq!(report.expected, 2);
    assert_eq!(report.finished, 2);
    assert!(coordinator.workers().is_empty());
    assert!(coordinator.deployer().running().is_empty());

    for token in ["token-start-and-goal-1-1", "token-start-and-goal-2-1"] {
        let token_report = report.token(token).expect("token reported");
        let non_start = token_report
            .records
            .iter()
            .filter(|r| !r.segment.starts_with("start-and-goal"))
            .count();
        assert_eq!(non_start, 4, "{}", token);
        assert!(token_report.finish_time.is_some());
        assert!(!token_report.is_flagged());
    }

    let written = fs::read_to_string(&config.results_file).expect("results file");
    assert_eq!(written, report.to_string());
    assert!(written.starts_with("Token token-start-and-goal-1-1:\n"));
    assert_eq!(written.matches("  Total: ").count(), 2);
}

#[tokio::test]
async fn test_contention_race_never_overcounts() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let definition = generator::generate_with_contention(2, 5, 1, 3).expect("generate");
    definition.write_json(&temp_dir.path().join("tracks.json")).expect("write tracks");
    let config = race_config(temp_dir.path(), 2, false);

    let store: Arc<dyn RaceStore> = Arc::new(MemoryRaceStore::new());
    let deployer = LocalDeployer::new(store.clone());
    let mut coordinator = RaceCoordinator::new(config, store.clone(), deployer);
    let report = coordinator.run(&CancellationToken::new()).await.expect("race");

    assert_eq!(report.expected, 2);
    assert!(report.finished <= report.expected, "finished {}", report.finished);
    let results = store.hash_get_all(keys::RESULTS).await.unwrap();
    assert_eq!(results.len() as i64, report.finished);
}

#[tokio::test]
async fn test_monitor_window_is_bounded() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    generator::generate_circular(1, 2)
        .expect("generate")
        .write_json(&temp_dir.path().join("tracks.json"))
        .expect("write tracks");

    // Slow workers and a one second window: the race cannot finish in time.
    let mut config = race_config(temp_dir.path(), 1, true);
    config.max_laps = 50;
    config.worker.work_delay_min_ms = 100;
    config.worker.work_delay_max_ms = 100;

    let store: Arc<dyn RaceStore> = Arc::new(MemoryRaceStore::new());
    let deployer = LocalDeployer::new(store.clone());
    let mut coordinator = RaceCoordinator::new(config.clone(), store, deployer);

    let started = std::time::Instant::now();
    let report = coordinator.run(&CancellationToken::new()).await.expect("race");
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(report.finished, 0);
    let token_report = report.token("token-start-and-goal-1-1").expect("token reported");
    assert!(token_report.finish_time.is_none());
    assert!(!token_report.records.is_empty());
    assert!(config.results_file.exists());
}

#[tokio::test]
async fn test_initialize_clears_previous_race() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let definition = generator::generate_circular(1, 2).expect("generate");
    let config = race_config(temp_dir.path(), 1, true);

    let store = Arc::new(MemoryRaceStore::new());
    let token = keys::token_id("start-and-goal-1", 1);
    store.counter_set(keys::FINISHED, 7).await.unwrap();
    store.hash_set(keys::RESULTS, &token, "1.0").await.unwrap();
    store.list_append(&keys::timings(&token), "segment-1-1:1.0").await.unwrap();
    store.queue_append(&keys::queue("segment-1-1"), "stale").await.unwrap();
    assert!(store.try_lock(&keys::lock("segment-1-1"), "old", Duration::from_secs(60)).await.unwrap());

    let coordinator = RaceCoordinator::new(config, store.clone(), LocalDeployer::new(store.clone()));
    coordinator.initialize(&definition).await.expect("initialize");

    assert_eq!(store.counter_get(keys::FINISHED).await.unwrap(), 0);
    assert!(store.hash_get_all(keys::RESULTS).await.unwrap().is_empty());
    assert!(store.list_range(&keys::timings(&token)).await.unwrap().is_empty());
    assert_eq!(store.queue_len(&keys::queue("segment-1-1")), 0);
    assert!(!store.is_locked(&keys::lock("segment-1-1")));

    let seeded = coordinator.seed(&definition).await.expect("seed");
    assert_eq!(seeded, [token]);
    assert_eq!(store.queue_len(&keys::queue("start-and-goal-1")), 1);
}

#[tokio::test]
async fn test_invalid_topology_aborts_before_provisioning() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(
        temp_dir.path().join("tracks.json"),
        r#"{ "tracks": [ { "trackId": "1", "segments": [
            { "segmentId": "segment-1-1", "type": "normal", "nextSegments": ["segment-1-1"] } ] } ] }"#,
    )
    .expect("write tracks");
    let config = race_config(temp_dir.path(), 1, true);

    let deployer = RecordingDeployer::failing_at(usize::MAX);
    let store: Arc<dyn RaceStore> = Arc::new(MemoryRaceStore::new());
    let mut coordinator = RaceCoordinator::new(config.clone(), store, deployer);
    let err = coordinator.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, RaceError::Track(TrackError::MissingStartGoal(_))), "got {:?}", err);
    assert!(coordinator.deployer().started().is_empty());
    assert!(!config.results_file.exists());
}

#[tokio::test]
async fn test_provisioning_failure_stops_started_workers() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    generator::generate_circular(1, 4)
        .expect("generate")
        .write_json(&temp_dir.path().join("tracks.json"))
        .expect("write tracks");
    let config = race_config(temp_dir.path(), 1, true);

    let store = Arc::new(MemoryRaceStore::new());
    let deployer = RecordingDeployer::failing_at(2);
    let mut coordinator = RaceCoordinator::new(config.clone(), store.clone(), deployer);
    let err = coordinator.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, RaceError::Deploy(_)), "got {:?}", err);
    let deployer = coordinator.deployer();
    assert_eq!(deployer.started(), ["seg-start-and-goal-1", "seg-segment-1-1"]);
    assert_eq!(deployer.stopped(), ["seg-start-and-goal-1", "seg-segment-1-1"]);
    assert!(deployer.store_stopped());

    // Nothing was seeded and no results were written.
    assert_eq!(store.queue_len(&keys::queue("start-and-goal-1")), 0);
    assert!(!config.results_file.exists());
}

#[tokio::test]
async fn test_aggregate_reports_bad_entries_per_token() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let definition = generator::generate_circular(2, 2).expect("generate");
    let config = race_config(temp_dir.path(), 1, true);

    // 1. Token 1 has one unparseable entry in its log, token 2 a clean one.
    let store = Arc::new(MemoryRaceStore::new());
    let first = keys::token_id("start-and-goal-1", 1);
    let second = keys::token_id("start-and-goal-2", 1);
    for entry in ["start-and-goal-1:0.5", "segment-1-1:not-a-number", "segment-1-1:1.5"] {
        store.list_append(&keys::timings(&first), entry).await.unwrap();
    }
    store.list_append(&keys::timings(&second), "segment-2-1:2.0").await.unwrap();
    store.hash_set(keys::RESULTS, &second, "2.5").await.unwrap();

    // 2. Aggregate straight from the store.
    let coordinator = RaceCoordinator::new(config, store.clone(), LocalDeployer::new(store.clone()));
    let report = coordinator
        .aggregate(&definition, RaceStatus { finished: 1, expected: 2 })
        .await;

    // 3. The bad entry flags only its own token.
    let flagged = report.token(&first).expect("first token reported");
    assert!(flagged.is_flagged());
    assert_eq!(flagged.malformed, ["segment-1-1:not-a-number"]);
    assert_eq!(flagged.records.len(), 2);
    assert!((flagged.total() - 2.0).abs() < 1e-9);
    assert!(flagged.finish_time.is_none());

    let clean = report.token(&second).expect("second token reported");
    assert!(!clean.is_flagged());
    assert!((clean.total() - 2.0).abs() < 1e-9);
    assert_eq!(clean.finish_time, Some(2.5));

    let rendered = report.to_string();
    assert!(rendered.contains("  Unparseable entry: segment-1-1:not-a-number\n"));
    assert!(rendered.contains("  Race time: 2.500000 seconds\n"));
}

#[tokio::test]
async fn test_aggregate_survives_unreadable_log() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let definition = generator::generate_circular(2, 2).expect("generate");
    let config = race_config(temp_dir.path(), 1, true);

    let store = Arc::new(MemoryRaceStore::new());
    let second = keys::token_id("start-and-goal-2", 1);
    store.list_append(&keys::timings(&second), "segment-2-1:1.0").await.unwrap();

    let coordinator = RaceCoordinator::new(config, store.clone(), LocalDeployer::new(store.clone()));
    // The first read (token 1's log) fails.
    store.inject_failures(1);
    let report = coordinator
        .aggregate(&definition, RaceStatus { finished: 0, expected: 2 })
        .await;

    assert_eq!(report.tokens.len(), 2);
    let unreadable = report.token(&keys::token_id("start-and-goal-1", 1)).expect("first token reported");
    assert!(unreadable.read_error.is_some());
    assert!(unreadable.is_flagged());
    let readable = report.token(&second).expect("second token reported");
    assert_eq!(readable.records.len(), 1);
    assert!(!readable.is_flagged());
}

/// Records deploy calls; the start at index `fail_at` fails.
#[derive(Default)]
struct RecordingDeployer {
    fail_at: usize,
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    store_stopped: Mutex<bool>,
}

impl RecordingDeployer {
    fn failing_at(fail_at: usize) -> Self {
        Self {
            fail_at,
            ..Default::default()
        }
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    fn store_stopped(&self) -> bool {
        *self.store_stopped.lock().unwrap()
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn start_store(&self) -> Result<(), DeployError> {
        Ok(())
    }

    async fn stop_store(&self) -> Result<(), DeployError> {
        *self.store_stopped.lock().unwrap() = true;
        Ok(())
    }

    async fn start_worker(&self, spec: &WorkerSpec) -> Result<String, DeployError> {
        let mut started = self.started.lock().unwrap();
        if started.len() == self.fail_at {
            return Err(DeployError::Command {
                command: format!("docker run {}", spec.name()),
                status: "exit status: 125".to_string(),
                stderr: "image not found".to_string(),
            });
        }
        started.push(spec.name());
        Ok(spec.name())
    }

    async fn stop_worker(&self, name: &str) -> Result<(), DeployError> {
        self.stopped.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
