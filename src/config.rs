use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the shared store lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    /// How long a single blocking queue read waits before returning empty.
    pub block_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            block_timeout_ms: 250,
        }
    }
}

impl StoreConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }

    /// Never zero: a zero block would make a redis read wait forever.
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms.max(1))
    }
}

/// Timing knobs for a segment worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerTuning {
    pub work_delay_min_ms: u64,
    pub work_delay_max_ms: u64,
    pub lock_ttl_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        Self {
            work_delay_min_ms: 500,
            work_delay_max_ms: 2000,
            lock_ttl_ms: 5000,
            backoff_initial_ms: 10,
            backoff_max_ms: 1000,
        }
    }
}

impl WorkerTuning {
    /// Zero-ish delays, for tests and quick local runs.
    pub fn fast() -> Self {
        Self {
            work_delay_min_ms: 1,
            work_delay_max_ms: 3,
            lock_ttl_ms: 1000,
            backoff_initial_ms: 1,
            backoff_max_ms: 20,
        }
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        let max = max.max(initial);
        Self {
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait now and doubles the next one, capped at `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }
}

/// Everything one segment worker needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub segment_id: String,
    pub next_segments: Vec<String>,
    pub start_goal: bool,
    pub max_laps: u32,
    pub store: StoreConfig,
    pub tuning: WorkerTuning,
}

impl WorkerConfig {
    /// `start_goal` defaults to whether the id starts with `start-and-goal`;
    /// deployed workers set it explicitly from the segment type.
    pub fn new(segment_id: impl Into<String>, next_segments: Vec<String>) -> Self {
        let segment_id = segment_id.into();
        let start_goal = segment_id.starts_with("start-and-goal");
        Self {
            segment_id,
            next_segments,
            start_goal,
            max_laps: 3,
            store: StoreConfig::default(),
            tuning: WorkerTuning::default(),
        }
    }

    pub fn start_goal(mut self, start_goal: bool) -> Self {
        self.start_goal = start_goal;
        self
    }

    pub fn max_laps(mut self, max_laps: u32) -> Self {
        self.max_laps = max_laps;
        self
    }

    pub fn tuning(mut self, tuning: WorkerTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

/// Parses the `--next` argument: comma separated, blanks dropped.
pub fn parse_next_segments(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub window_secs: u64,
    pub poll_interval_ms: u64,
    /// Leave the window early once every token has finished.
    pub stop_on_completion: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_secs: 30,
            poll_interval_ms: 1000,
            stop_on_completion: false,
        }
    }
}

impl MonitorConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Container settings for the docker deployer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DockerConfig {
    pub network: String,
    pub worker_image: String,
    pub store_image: String,
    pub store_container: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            network: "race-net".to_string(),
            worker_image: "segment".to_string(),
            store_image: "redis:7".to_string(),
            store_container: "race-store".to_string(),
        }
    }
}

/// Top-level race settings, handed to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RaceConfig {
    pub tracks_file: PathBuf,
    pub results_file: PathBuf,
    pub tokens_per_track: usize,
    pub max_laps: u32,
    pub monitor: MonitorConfig,
    pub store: StoreConfig,
    pub worker: WorkerTuning,
    pub docker: DockerConfig,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            tracks_file: PathBuf::from("tracks.json"),
            results_file: PathBuf::from("race_results.txt"),
            tokens_per_track: 1,
            max_laps: 3,
            monitor: MonitorConfig::default(),
            store: StoreConfig::default(),
            worker: WorkerTuning::default(),
            docker: DockerConfig::default(),
        }
    }
}

impl RaceConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: RaceConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}
