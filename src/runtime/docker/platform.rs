//! Shared platform services: bring-up and group teardown.

use crate::engine::ContainerSpec;
use crate::error::{Result, RuntimeError};
use crate::labels::{LabelFilter, Labels};
use crate::lifecycle::split_bind;
use crate::manifest::{ManifestLayout, ManifestSet, PlatformAddresses};
use crate::naming::{self, COMPONENTS_PATH, CONFIG_FILE, PLACEMENT_HOST, Vars};

use super::DockerRuntime;
use super::config::{DEFAULT_CONFIG_MOUNT, ServiceConfig};

/// Which side of the network the manifests address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Audience {
    /// Host ports, for tools running outside Docker.
    External,
    /// Container names on the shared network.
    Internal,
}

impl DockerRuntime {
    pub(super) fn manifests(&self, audience: Audience) -> ManifestSet {
        let pick = |service: &ServiceConfig| match audience {
            Audience::External => service.external_host.clone(),
            Audience::Internal => service.internal_host.clone(),
        };

        ManifestSet::platform(&PlatformAddresses {
            redis_host: pick(&self.config.redis.service),
            redis_password: self.config.redis.password.clone(),
            zipkin_host: pick(&self.config.zipkin),
        })
    }

    /// The ingress bind that mounts the config volume, if any.
    fn config_bind(&self) -> Option<&str> {
        self.config
            .ingress
            .volumes
            .iter()
            .map(String::as_str)
            .find(|bind| {
                split_bind(bind).is_some_and(|(volume, _)| volume == self.config.config_volume)
            })
    }

    /// Values for the sidecar command templates.
    pub(super) fn sidecar_vars(&self) -> Vars {
        let mount = self
            .config_bind()
            .and_then(split_bind)
            .map(|(_, path)| path)
            .unwrap_or(DEFAULT_CONFIG_MOUNT);
        let layout = ManifestLayout::default();

        Vars::new()
            .with(PLACEMENT_HOST, self.config.placement.internal_host.clone())
            .with(COMPONENTS_PATH, layout.components_in(mount))
            .with(CONFIG_FILE, layout.configuration_in(mount))
    }

    /// Platform services in start order: store, tracer, placement, ingress.
    pub fn platform_services(&self) -> Vec<ContainerSpec> {
        let service = |svc: &ServiceConfig, role: &str| ContainerSpec {
            name: svc.name.clone(),
            image: svc.image.clone(),
            cmd: svc.cmd.clone(),
            network: Some(svc.network.clone()),
            ports: svc.ports.clone(),
            volumes: Vec::new(),
            labels: Labels::system(role),
        };

        let ingress = &self.config.ingress;
        vec![
            service(&self.config.redis.service, "redis"),
            service(&self.config.zipkin, "zipkin"),
            service(&self.config.placement, "placement"),
            ContainerSpec {
                name: ingress.name.clone(),
                image: ingress.image.clone(),
                cmd: naming::render_all(&ingress.cmd, &self.sidecar_vars()),
                network: Some(ingress.network.clone()),
                ports: ingress.ports.clone(),
                volumes: ingress.volumes.clone(),
                labels: Labels::system("ingress"),
            },
        ]
    }

    pub(super) async fn install_platform(&self) -> Result<()> {
        let root = &self.config.manifest_dir;
        self.manifests(Audience::External).save(root)?;
        tracing::info!("Wrote platform manifests to {}", root.display());

        for volume in &self.config.volumes {
            self.resources.ensure_volume(volume).await?;
        }

        if let Some(bind) = self.config_bind() {
            let archive = self.manifests(Audience::Internal).to_archive()?;
            self.resources
                .copy_into_volume(&self.config.tools.helper(), bind, archive)
                .await?;
        }

        self.resources.ensure_network(&self.config.network).await?;

        for spec in self.platform_services() {
            self.resources.run_container(&spec).await?;
        }

        tracing::info!("Platform is up on network {}", self.config.network);
        Ok(())
    }

    pub(super) async fn uninstall_platform(&self) -> Result<()> {
        let filter = LabelFilter::group();
        let engine = self.resources.engine();
        let list_failed = |kind: &str, e: crate::engine::EngineError| RuntimeError::ListFailed {
            kind: kind.to_string(),
            reason: e.to_string(),
        };

        let containers = engine
            .list_containers(&filter)
            .await
            .map_err(|e| list_failed("containers", e))?;
        for container in &containers {
            self.resources.remove_container(&container.id).await?;
        }

        let volumes = engine
            .list_volumes(&filter)
            .await
            .map_err(|e| list_failed("volumes", e))?;
        for volume in &volumes {
            self.resources.remove_volume(&volume.name).await?;
        }

        let networks = engine
            .list_networks(&filter)
            .await
            .map_err(|e| list_failed("networks", e))?;
        for network in &networks {
            self.resources.remove_network(&network.id).await?;
        }

        tracing::info!(
            "Removed {} containers, {} volumes, {} networks",
            containers.len(),
            volumes.len(),
            networks.len()
        );
        Ok(())
    }
}
