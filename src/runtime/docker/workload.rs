//! Workload pairs, logs and the dashboard container.

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::engine::{ContainerSpec, LogOptions};
use crate::error::{Result, RuntimeError};
use crate::labels::{APP_LABEL, Labels, SIDECAR_LABEL};
use crate::naming::{self, Vars};
use crate::runtime::{DashboardOptions, LogsOptions, RemoveOptions, RunOptions};

use super::DockerRuntime;

fn require_app_id(app_id: &str) -> Result<&str> {
    let app_id = app_id.trim();
    if app_id.is_empty() {
        return Err(RuntimeError::InvalidOptions {
            reason: "app id must not be empty".to_string(),
        });
    }
    Ok(app_id)
}

impl DockerRuntime {
    pub fn app_container_name(&self, app_id: &str) -> String {
        naming::render(&self.config.app.name, &Vars::name(app_id))
    }

    pub fn sidecar_container_name(&self, app_id: &str) -> String {
        naming::render(&self.config.sidecar.name, &Vars::name(app_id))
    }

    pub(super) fn app_spec(&self, app_id: &str, image: &str, command: &[String]) -> ContainerSpec {
        let app = &self.config.app;
        ContainerSpec {
            name: self.app_container_name(app_id),
            image: image.to_string(),
            cmd: command.to_vec(),
            network: Some(app.network.clone()),
            ports: Vec::new(),
            volumes: app.volumes.clone(),
            labels: Labels::with([(APP_LABEL, app_id)]),
        }
    }

    /// Sidecar attached to the network namespace of `app_container`.
    pub(super) fn sidecar_spec(
        &self,
        app_id: &str,
        app_container: &str,
        app_port: Option<u16>,
    ) -> ContainerSpec {
        let sidecar = &self.config.sidecar;

        let mut cmd = naming::render_all(&sidecar.cmd, &self.sidecar_vars());
        cmd.extend(["--app-id".to_string(), app_id.to_string()]);
        if let Some(port) = app_port {
            cmd.extend(["--app-port".to_string(), port.to_string()]);
        }

        ContainerSpec {
            name: self.sidecar_container_name(app_id),
            image: sidecar.image.clone(),
            cmd,
            network: Some(naming::render(&sidecar.network, &Vars::name(app_container))),
            ports: Vec::new(),
            volumes: sidecar.volumes.clone(),
            labels: Labels::with([(APP_LABEL, app_id), (SIDECAR_LABEL, app_id)]),
        }
    }

    /// Start the workload, then its sidecar. If the sidecar cannot start,
    /// the workload container is removed again.
    pub(super) async fn run_workload(&self, options: &RunOptions) -> Result<()> {
        let app_id = require_app_id(&options.app_id)?;
        let image = options
            .image
            .as_deref()
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| RuntimeError::InvalidOptions {
                reason: format!("an image is required to run '{app_id}'"),
            })?;

        self.resources.ensure_network(&self.config.app.network).await?;

        let app = self.app_spec(app_id, image, &options.command);
        self.resources.run_container(&app).await?;

        let sidecar = self.sidecar_spec(app_id, &app.name, options.app_port);
        if let Err(e) = self.resources.run_container(&sidecar).await {
            tracing::warn!(
                "Sidecar for {} failed to start, removing {}: {}",
                app_id,
                app.name,
                e
            );
            if let Err(cleanup) = self.resources.remove_container(&app.name).await {
                tracing::warn!("Rollback of {} failed: {}", app.name, cleanup);
            }
            return Err(e);
        }

        tracing::info!("App {} is running with sidecar {}", app_id, sidecar.name);
        Ok(())
    }

    pub(super) async fn remove_workload(&self, options: &RemoveOptions) -> Result<()> {
        let app_id = require_app_id(&options.app_id)?;

        self.resources
            .remove_container(&self.sidecar_container_name(app_id))
            .await?;
        self.resources
            .remove_container(&self.app_container_name(app_id))
            .await?;
        Ok(())
    }

    /// Copy the container's output to stdout.
    pub(super) async fn stream_logs(&self, options: &LogsOptions) -> Result<()> {
        let app_id = require_app_id(&options.app_id)?;
        let name = if options.sidecar {
            self.sidecar_container_name(app_id)
        } else {
            self.app_container_name(app_id)
        };
        let failed = |reason: String| RuntimeError::LogsFailed {
            name: name.clone(),
            reason,
        };

        let log_options = LogOptions {
            follow: options.follow,
            tail: options.tail.clone().filter(|t| !t.is_empty()),
        };
        let mut stdout = tokio::io::stdout();
        let mut stream = self.resources.engine().logs(&name, log_options);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            stdout
                .write_all(chunk.as_bytes())
                .await
                .map_err(|e| failed(e.to_string()))?;
        }
        stdout.flush().await.map_err(|e| failed(e.to_string()))?;
        Ok(())
    }

    pub(super) fn dashboard_spec(&self, options: &DashboardOptions) -> ContainerSpec {
        let dashboard = &self.config.dashboard;
        let host_port = options.port.unwrap_or(dashboard.container_port);
        ContainerSpec {
            name: dashboard.name.clone(),
            image: dashboard.image.clone(),
            cmd: Vec::new(),
            network: Some(dashboard.network.clone()),
            ports: vec![format!("{host_port}:{}", dashboard.container_port)],
            volumes: Vec::new(),
            labels: Labels::system("dashboard"),
        }
    }

    pub(super) async fn run_dashboard(&self, options: &DashboardOptions) -> Result<()> {
        self.resources
            .ensure_network(&self.config.dashboard.network)
            .await?;

        let spec = self.dashboard_spec(options);
        self.resources.run_container(&spec).await?;

        let port = options.port.unwrap_or(self.config.dashboard.container_port);
        tracing::info!("Dashboard running on http://localhost:{}", port);
        Ok(())
    }
}
