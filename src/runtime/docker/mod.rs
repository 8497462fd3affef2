//! Backend that runs the platform and workloads as Docker containers.

pub mod config;
mod platform;
mod workload;

use std::sync::Arc;

use async_trait::async_trait;

use super::{DashboardOptions, LogsOptions, RemoveOptions, RunOptions, Runtime};
use crate::engine::{ContainerEngine, DockerEngine};
use crate::error::{Result, RuntimeError};
use crate::lifecycle::ResourceManager;

pub use config::DockerRuntimeConfig;

pub struct DockerRuntime {
    config: DockerRuntimeConfig,
    resources: ResourceManager,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon.
    pub async fn connect(config: DockerRuntimeConfig) -> Result<Self> {
        let engine = DockerEngine::connect()
            .await
            .map_err(|e| RuntimeError::EngineUnavailable {
                reason: e.to_string(),
            })?;
        Ok(Self::with_engine(config, Arc::new(engine)))
    }

    /// Use an already connected engine.
    pub fn with_engine(mut config: DockerRuntimeConfig, engine: Arc<dyn ContainerEngine>) -> Self {
        config.apply_defaults();
        let resources = ResourceManager::new(engine, config.debug);
        Self { config, resources }
    }

    pub fn config(&self) -> &DockerRuntimeConfig {
        &self.config
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn install(&self) -> Result<()> {
        self.install_platform().await
    }

    async fn uninstall(&self) -> Result<()> {
        self.uninstall_platform().await
    }

    async fn run(&self, options: RunOptions) -> Result<()> {
        self.run_workload(&options).await
    }

    async fn remove(&self, options: RemoveOptions) -> Result<()> {
        self.remove_workload(&options).await
    }

    async fn logs(&self, options: LogsOptions) -> Result<()> {
        self.stream_logs(&options).await
    }

    async fn dashboard(&self, options: DashboardOptions) -> Result<()> {
        self.run_dashboard(&options).await
    }
}
