use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use crate::deploy::{Deployer, WorkerSpec};
use crate::error::{DeployError, RaceError};
use crate::race::SegmentWorker;
use crate::store::RaceStore;

type WorkerTask = (CancellationToken, JoinHandle<Result<(), RaceError>>);

/// Runs segment workers as tasks in this process, all sharing one store.
pub struct LocalDeployer {
    store: Arc<dyn RaceStore>,
    shutdown: CancellationToken,
    workers: DashMap<String, WorkerTask>,
}

impl LocalDeployer {
    pub fn new(store: Arc<dyn RaceStore>) -> Self {
        Self {
            store,
            shutdown: CancellationToken::new(),
            workers: DashMap::new(),
        }
    }

    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.iter().map(|w| w.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Deployer for LocalDeployer {
    async fn start_store(&self) -> Result<(), DeployError> {
        Ok(())
    }

    async fn stop_store(&self) -> Result<(), DeployError> {
        self.shutdown.cancel();
        Ok(())
    }

    async fn start_worker(&self, spec: &WorkerSpec) -> Result<String, DeployError> {
        let name = spec.name();
        if self.workers.contains_key(&name) {
            self.stop_worker(&name).await?;
        }

        let token = self.shutdown.child_token();
        let mut worker = SegmentWorker::new(spec.worker_config(), self.store.clone());
        let run_token = token.clone();
        let handle = tokio::spawn(async move { worker.run(run_token).await });

        self.workers.insert(name.clone(), (token, handle));
        info!(worker = %name, "local worker started");
        Ok(name)
    }

    async fn stop_worker(&self, name: &str) -> Result<(), DeployError> {
        let Some((_, (token, handle))) = self.workers.remove(name) else {
            return Ok(());
        };
        token.cancel();
        match handle.await {
            Ok(Ok(())) => {
                info!(worker = name, "local worker stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(worker = name, error = %e, "worker ended with error");
                Err(DeployError::Worker(name.to_string(), e.to_string()))
            }
            Err(e) => Err(DeployError::Worker(name.to_string(), e.to_string())),
        }
    }
}
