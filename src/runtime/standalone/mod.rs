//! Backend that runs the sidecar and the app as local processes.

pub mod config;
pub mod error;
pub mod launch;
pub mod metadata;
pub mod orchestrator;
pub mod probe;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{DashboardOptions, LogsOptions, RemoveOptions, RunOptions, Runtime};
use crate::error::{Result, RuntimeError};
use crate::manifest::{ManifestSet, PlatformAddresses};

pub use config::StandaloneRuntimeConfig;
pub use error::ProcessError;
pub use launch::{CommandSpec, LaunchPlan};
pub use metadata::{HttpMetadataClient, MetadataClient};
pub use orchestrator::{
    KillTarget, Orchestrator, RunState, ShutdownReport, ShutdownSignals, shutdown_pair,
};
pub use probe::{PortProbe, TcpProbe};

const NAME: &str = "standalone";

/// The run currently owned by this instance.
struct ActiveRun {
    app_id: String,
    stop: oneshot::Sender<()>,
}

pub struct StandaloneRuntime {
    config: StandaloneRuntimeConfig,
    probe: Arc<dyn PortProbe>,
    metadata: Arc<dyn MetadataClient>,
    active: Mutex<Option<ActiveRun>>,
}

impl StandaloneRuntime {
    pub fn new(config: StandaloneRuntimeConfig) -> Self {
        Self::with_clients(config, Arc::new(TcpProbe), Arc::new(HttpMetadataClient::new()))
    }

    /// Use custom readiness and metadata clients.
    pub fn with_clients(
        mut config: StandaloneRuntimeConfig,
        probe: Arc<dyn PortProbe>,
        metadata: Arc<dyn MetadataClient>,
    ) -> Self {
        config.apply_defaults();
        Self {
            config,
            probe,
            metadata,
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StandaloneRuntimeConfig {
        &self.config
    }

    fn manifests(&self) -> ManifestSet {
        ManifestSet::platform(&PlatformAddresses {
            redis_host: self.config.redis_host.clone(),
            redis_password: self.config.redis_password.clone(),
            zipkin_host: self.config.zipkin_host.clone(),
        })
    }

    /// Id of the app currently running, if any.
    pub fn active_app(&self) -> Option<String> {
        self.active
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|run| run.app_id.clone()))
    }

    fn claim(&self, app_id: &str) -> Result<oneshot::Receiver<()>> {
        let mut active = self.active.lock().map_err(|_| RuntimeError::InvalidOptions {
            reason: "run state lock poisoned".to_string(),
        })?;
        if let Some(run) = active.as_ref() {
            return Err(ProcessError::AlreadyRunning {
                app_id: run.app_id.clone(),
            }
            .into());
        }

        let (stop, stopped) = oneshot::channel();
        *active = Some(ActiveRun {
            app_id: app_id.to_string(),
            stop,
        });
        Ok(stopped)
    }

    fn release(&self) -> Option<ActiveRun> {
        self.active.lock().ok().and_then(|mut guard| guard.take())
    }

    /// Ask the active run to shut down. Returns whether one was stopped.
    fn stop_active(&self, app_id: Option<&str>) -> bool {
        let Ok(mut active) = self.active.lock() else {
            return false;
        };
        let matches = match (active.as_ref(), app_id) {
            (Some(run), Some(id)) => run.app_id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return false;
        }

        match active.take() {
            Some(run) => {
                tracing::info!("Stopping {}", run.app_id);
                let _ = run.stop.send(());
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Runtime for StandaloneRuntime {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn install(&self) -> Result<()> {
        let root = &self.config.config_dir;
        self.manifests().save(root)?;
        tracing::info!("Wrote platform manifests to {}", root.display());

        match self.config.find_daprd() {
            Some(path) => tracing::debug!("Using sidecar binary {}", path.display()),
            None => tracing::warn!(
                "Sidecar binary '{}' not found; install it or set daprd_path",
                self.config.daprd_path
            ),
        }
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        self.stop_active(None);
        self.manifests().remove(&self.config.config_dir)?;
        tracing::info!(
            "Removed platform manifests from {}",
            self.config.config_dir.display()
        );
        Ok(())
    }

    async fn run(&self, options: RunOptions) -> Result<()> {
        let plan = LaunchPlan::build(&self.config, &options)?;
        let mut signals = ShutdownSignals::install()?;
        let stopped = self.claim(&plan.app_id)?;

        let orchestrator = Orchestrator::new(Arc::clone(&self.probe), Arc::clone(&self.metadata));
        let shutdown = async move {
            tokio::select! {
                _ = signals.recv() => {}
                _ = stopped => {}
            }
        };

        let result = orchestrator.run(plan, shutdown).await;
        self.release();

        let report = result?;
        if !report.is_clean() {
            tracing::warn!("Shutdown did not stop every process cleanly");
        }
        Ok(())
    }

    async fn remove(&self, options: RemoveOptions) -> Result<()> {
        if !self.stop_active(Some(&options.app_id)) {
            tracing::debug!("No active run for {}, nothing to remove", options.app_id);
        }
        Ok(())
    }

    async fn logs(&self, _options: LogsOptions) -> Result<()> {
        Err(RuntimeError::Unsupported {
            runtime: NAME,
            operation: "logs",
        })
    }

    async fn dashboard(&self, _options: DashboardOptions) -> Result<()> {
        Err(RuntimeError::Unsupported {
            runtime: NAME,
            operation: "dashboard",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubMetadata, StubProbe};

    fn runtime(dir: &std::path::Path) -> StandaloneRuntime {
        StandaloneRuntime::with_clients(
            StandaloneRuntimeConfig {
                config_dir: dir.to_path_buf(),
                daprd_path: "/definitely/not/here/daprd".to_string(),
                ..Default::default()
            },
            Arc::new(StubProbe::new()),
            Arc::new(StubMetadata::new()),
        )
    }

    #[tokio::test]
    async fn test_install_writes_manifests_without_daprd() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());

        rt.install().await.unwrap();

        let config = std::fs::read_to_string(dir.path().join("config.yaml")).unwrap();
        assert!(config.contains("http://localhost:50004/api/v2/spans"));
        assert!(dir.path().join("components/pubsub.yaml").is_file());
    }

    #[tokio::test]
    async fn test_uninstall_removes_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        rt.install().await.unwrap();

        rt.uninstall().await.unwrap();

        assert!(!dir.path().join("config.yaml").exists());
    }

    #[test]
    fn test_remove_without_active_run_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());

        tokio_test::block_on(rt.remove(RemoveOptions {
            app_id: "orders".to_string(),
        }))
        .unwrap();
        assert!(rt.active_app().is_none());
    }

    #[test]
    fn test_second_claim_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());

        let _first = rt.claim("orders").unwrap();
        let err = rt.claim("billing").unwrap_err();

        assert!(matches!(
            err,
            RuntimeError::Process(ProcessError::AlreadyRunning { ref app_id }) if app_id == "orders"
        ));
        assert_eq!(rt.active_app().as_deref(), Some("orders"));
    }

    #[test]
    fn test_stop_active_only_matches_its_app() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let mut stopped = rt.claim("orders").unwrap();

        assert!(!rt.stop_active(Some("billing")));
        assert!(stopped.try_recv().is_err());

        assert!(rt.stop_active(Some("orders")));
        assert!(stopped.try_recv().is_ok());
        assert!(rt.active_app().is_none());
    }

    #[tokio::test]
    async fn test_logs_and_dashboard_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());

        assert!(matches!(
            rt.logs(LogsOptions::default()).await,
            Err(RuntimeError::Unsupported { operation: "logs", .. })
        ));
        assert!(matches!(
            rt.dashboard(DashboardOptions::default()).await,
            Err(RuntimeError::Unsupported {
                operation: "dashboard",
                ..
            })
        ));
    }
}
