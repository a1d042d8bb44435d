pub mod docker;
pub mod local;

use async_trait::async_trait;
use crate::config::{StoreConfig, WorkerConfig, WorkerTuning};
use crate::error::DeployError;

pub use docker::DockerDeployer;
pub use local::LocalDeployer;

/// Everything needed to bring up the worker for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSpec {
    pub segment_id: String,
    pub next_segments: Vec<String>,
    pub start_goal: bool,
    pub max_laps: u32,
    pub store: StoreConfig,
    pub tuning: WorkerTuning,
}

impl WorkerSpec {
    /// Deployment identity. Starting a worker with the same name replaces it.
    pub fn name(&self) -> String {
        format!("seg-{}", self.segment_id)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::new(self.segment_id.clone(), self.next_segments.clone())
            .start_goal(self.start_goal)
            .max_laps(self.max_laps)
            .store(self.store.clone())
            .tuning(self.tuning.clone())
    }

    /// Arguments for the `segment` binary.
    pub fn cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--segment-id".to_string(),
            self.segment_id.clone(),
            "--next".to_string(),
            self.next_segments.join(","),
            "--store-host".to_string(),
            self.store.host.clone(),
            "--store-port".to_string(),
            self.store.port.to_string(),
            "--max-laps".to_string(),
            self.max_laps.to_string(),
            "--work-delay-min-ms".to_string(),
            self.tuning.work_delay_min_ms.to_string(),
            "--work-delay-max-ms".to_string(),
            self.tuning.work_delay_max_ms.to_string(),
            "--lock-ttl-ms".to_string(),
            self.tuning.lock_ttl_ms.to_string(),
            "--backoff-initial-ms".to_string(),
            self.tuning.backoff_initial_ms.to_string(),
            "--backoff-max-ms".to_string(),
            self.tuning.backoff_max_ms.to_string(),
            "--block-timeout-ms".to_string(),
            self.store.block_timeout_ms.to_string(),
        ];
        if self.start_goal {
            args.push("--start-goal".to_string());
        }
        args
    }
}

/// The service that brings workers and the shared store up and down.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn start_store(&self) -> Result<(), DeployError>;
    async fn stop_store(&self) -> Result<(), DeployError>;
    /// Start a worker, replacing any existing one with the same name.
    /// Returns the name to pass to `stop_worker`.
    async fn start_worker(&self, spec: &WorkerSpec) -> Result<String, DeployError>;
    async fn stop_worker(&self, name: &str) -> Result<(), DeployError>;
}
