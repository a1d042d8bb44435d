use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use crate::config::{DockerConfig, StoreConfig};
use crate::deploy::{Deployer, WorkerSpec};
use crate::error::DeployError;

/// Port the store listens on inside the container network.
const STORE_INNER_PORT: u16 = 6379;

/// Runs the store and every segment worker as docker containers on one network.
pub struct DockerDeployer {
    config: DockerConfig,
    store: StoreConfig,
}

impl DockerDeployer {
    pub fn new(config: DockerConfig, store: StoreConfig) -> Self {
        Self { config, store }
    }

    async fn docker(&self, args: &[String]) -> Result<String, DeployError> {
        let command = format!("docker {}", args.join(" "));
        debug!(%command, "running");
        let output = Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|source| DeployError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeployError::Command {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn remove_container(&self, name: &str) {
        // Absent containers are fine here.
        if let Err(e) = self.docker(&owned(&["rm", "-f", name])).await {
            debug!(container = name, error = %e, "nothing to remove");
        }
    }

    async fn ensure_network(&self) -> Result<(), DeployError> {
        let network = self.config.network.as_str();
        if self.docker(&owned(&["network", "inspect", network])).await.is_ok() {
            return Ok(());
        }
        self.docker(&owned(&["network", "create", network])).await?;
        info!(network, "docker network created");
        Ok(())
    }
}

#[async_trait]
impl Deployer for DockerDeployer {
    async fn start_store(&self) -> Result<(), DeployError> {
        self.ensure_network().await?;
        let name = self.config.store_container.as_str();
        self.remove_container(name).await;

        let publish = format!("{}:{}", self.store.port, STORE_INNER_PORT);
        let mut args = owned(&["run", "-d", "--name", name, "--net", self.config.network.as_str(), "-p", publish.as_str()]);
        args.push(self.config.store_image.clone());
        self.docker(&args).await?;
        info!(container = name, port = self.store.port, "store container started");
        Ok(())
    }

    async fn stop_store(&self) -> Result<(), DeployError> {
        let name = self.config.store_container.as_str();
        self.docker(&owned(&["rm", "-f", name])).await?;
        info!(container = name, "store container removed");
        Ok(())
    }

    async fn start_worker(&self, spec: &WorkerSpec) -> Result<String, DeployError> {
        let name = spec.name();
        self.remove_container(&name).await;

        // Inside the network the store is reached by container name.
        let mut inner = spec.clone();
        inner.store.host = self.config.store_container.clone();
        inner.store.port = STORE_INNER_PORT;

        let mut args = owned(&["run", "-d", "--name", name.as_str(), "--net", self.config.network.as_str()]);
        args.push(self.config.worker_image.clone());
        args.extend(inner.cli_args());
        self.docker(&args).await?;

        info!(container = %name, segment = %spec.segment_id, "worker container started");
        Ok(name)
    }

    async fn stop_worker(&self, name: &str) -> Result<(), DeployError> {
        if let Err(e) = self.docker(&owned(&["stop", name])).await {
            warn!(container = name, error = %e, "stop failed, removing anyway");
        }
        self.docker(&owned(&["rm", "-f", name])).await?;
        info!(container = name, "worker container removed");
        Ok(())
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
