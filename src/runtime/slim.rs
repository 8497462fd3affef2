//! Backend for environments without a managed platform.

use async_trait::async_trait;
use serde::Deserialize;

use super::{DashboardOptions, LogsOptions, RemoveOptions, RunOptions, Runtime};
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SlimRuntimeConfig {
    pub debug: bool,
}

/// Every operation succeeds without doing anything.
#[derive(Debug, Clone)]
pub struct SlimRuntime {
    config: SlimRuntimeConfig,
}

impl SlimRuntime {
    pub fn new(config: SlimRuntimeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Runtime for SlimRuntime {
    fn name(&self) -> &'static str {
        "slim"
    }

    async fn install(&self) -> Result<()> {
        tracing::debug!("slim: install is a no-op (debug={})", self.config.debug);
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self, options: RunOptions) -> Result<()> {
        tracing::debug!("slim: nothing to run for {}", options.app_id);
        Ok(())
    }

    async fn remove(&self, _options: RemoveOptions) -> Result<()> {
        Ok(())
    }

    async fn logs(&self, _options: LogsOptions) -> Result<()> {
        Ok(())
    }

    async fn dashboard(&self, _options: DashboardOptions) -> Result<()> {
        Ok(())
    }
}
