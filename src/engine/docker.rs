//! [`ContainerEngine`] backed by the Docker daemon through bollard.
//!
//! # Connection
//!
//! `connect_docker()` tries bollard's local defaults first (which honors
//! `DOCKER_HOST`), then falls back to the Docker Desktop socket in
//! `~/.docker/run/docker.sock` and the rootless socket under
//! `$XDG_RUNTIME_DIR`. A candidate only counts once it answers a ping.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::engine::error::{EngineError, ResourceKind, Result};
use crate::engine::{ContainerEngine, CreateContainer, LogOptions, ResourceSummary};
use crate::labels::LabelFilter;

/// Seconds bollard waits on a socket connection before giving up.
const SOCKET_TIMEOUT_SECS: u64 = 120;

/// Connect to the Docker daemon, trying the usual socket locations.
pub async fn connect_docker() -> Result<Docker> {
    let mut last_error = String::from("no docker socket found");

    match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => last_error = e.to_string(),
        },
        Err(e) => last_error = e.to_string(),
    }

    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let Some(path) = socket.to_str() else {
            continue;
        };
        match Docker::connect_with_socket(path, SOCKET_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker via {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = e.to_string(),
            },
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(EngineError::Unavailable { reason: last_error })
}

fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker").join("run").join("docker.sock"));
    }
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        sockets.push(PathBuf::from(runtime_dir).join("docker.sock"));
    }
    sockets
}

/// Map a bollard error onto the engine taxonomy.
fn classify(err: BollardError, kind: ResourceKind, name: &str, operation: &str) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound {
            kind,
            name: name.to_string(),
        },
        BollardError::DockerResponseServerError {
            status_code: 409, ..
        } => EngineError::Conflict {
            kind,
            name: name.to_string(),
        },
        other => EngineError::Api {
            operation: format!("{operation} {kind} '{name}'"),
            reason: other.to_string(),
        },
    }
}

fn label_filters(filter: &LabelFilter) -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), vec![filter.expression()])])
}

/// Docker-backed engine.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the local daemon.
    pub async fn connect() -> Result<Self> {
        Ok(Self {
            docker: connect_docker().await?,
        })
    }

    /// Wrap an existing connection.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Unavailable {
                reason: e.to_string(),
            })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match classify(e, ResourceKind::Image, image, "inspect") {
                EngineError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> BoxStream<'a, Result<String>> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .map(move |item| match item {
                Ok(info) => {
                    let status = info.status.unwrap_or_default();
                    Ok(match info.progress {
                        Some(progress) => format!("{status} {progress}"),
                        None => status,
                    })
                }
                Err(e) => Err(classify(e, ResourceKind::Image, image, "pull")),
            })
            .boxed()
    }

    async fn create_container(&self, request: &CreateContainer) -> Result<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = request
            .ports
            .exposed
            .iter()
            .map(|key| (key.clone(), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = request
            .ports
            .bindings
            .iter()
            .map(|(key, bindings)| {
                let bindings = bindings
                    .iter()
                    .map(|b| PortBinding {
                        host_ip: (!b.host_ip.is_empty()).then(|| b.host_ip.clone()),
                        host_port: (!b.host_port.is_empty()).then(|| b.host_port.clone()),
                    })
                    .collect();
                (key.clone(), Some(bindings))
            })
            .collect();

        let restart_policy = request.restart_always.then(|| RestartPolicy {
            name: Some(RestartPolicyNameEnum::ALWAYS),
            maximum_retry_count: None,
        });

        let host_config = HostConfig {
            network_mode: request.network_mode.clone(),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            binds: (!request.binds.is_empty()).then(|| request.binds.clone()),
            restart_policy,
            ..Default::default()
        };

        let config = Config {
            image: Some(request.image.clone()),
            cmd: (!request.cmd.is_empty()).then(|| request.cmd.clone()),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            labels: Some(request.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: request.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| classify(e, ResourceKind::Container, &request.name, "create"))?;

        for warning in &response.warnings {
            tracing::warn!("Creating container {}: {}", request.name, warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, ResourceKind::Container, name, "start"))
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| classify(e, ResourceKind::Container, name, "remove"))
    }

    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ResourceSummary>> {
        let options = ListContainersOptions {
            all: true,
            filters: label_filters(filter),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| classify(e, ResourceKind::Container, &filter.expression(), "list"))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                Some(ResourceSummary { id, name })
            })
            .collect())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match classify(e, ResourceKind::Network, name, "inspect") {
                EngineError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            labels: labels.clone(),
            ..Default::default()
        };

        self.docker
            .create_network(options)
            .await
            .map(|_| ())
            .map_err(|e| classify(e, ResourceKind::Network, name, "create"))
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.docker
            .remove_network(name)
            .await
            .map_err(|e| classify(e, ResourceKind::Network, name, "remove"))
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<ResourceSummary>> {
        let options = ListNetworksOptions {
            filters: label_filters(filter),
        };

        let networks = self
            .docker
            .list_networks(Some(options))
            .await
            .map_err(|e| classify(e, ResourceKind::Network, &filter.expression(), "list"))?;

        Ok(networks
            .into_iter()
            .filter_map(|n| {
                let id = n.id?;
                let name = n.name.unwrap_or_else(|| id.clone());
                Some(ResourceSummary { id, name })
            })
            .collect())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) => match classify(e, ResourceKind::Volume, name, "inspect") {
                EngineError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels: labels.clone(),
            ..Default::default()
        };

        self.docker
            .create_volume(options)
            .await
            .map(|_| ())
            .map_err(|e| classify(e, ResourceKind::Volume, name, "create"))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
            .map_err(|e| classify(e, ResourceKind::Volume, name, "remove"))
    }

    async fn list_volumes(&self, filter: &LabelFilter) -> Result<Vec<ResourceSummary>> {
        let options = ListVolumesOptions {
            filters: label_filters(filter),
        };

        let response = self
            .docker
            .list_volumes(Some(options))
            .await
            .map_err(|e| classify(e, ResourceKind::Volume, &filter.expression(), "list"))?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| ResourceSummary {
                id: v.name.clone(),
                name: v.name,
            })
            .collect())
    }

    async fn upload_archive(&self, container: &str, path: &str, archive: Bytes) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(container, Some(options), archive)
            .await
            .map_err(|e| classify(e, ResourceKind::Container, container, "upload archive to"))
    }

    fn logs<'a>(
        &'a self,
        container: &'a str,
        options: LogOptions,
    ) -> BoxStream<'a, Result<String>> {
        let options = LogsOptions {
            follow: options.follow,
            stdout: true,
            stderr: true,
            tail: options.tail.unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        self.docker
            .logs(container, Some(options))
            .map(move |item| match item {
                Ok(output) => Ok(output.to_string()),
                Err(e) => Err(classify(e, ResourceKind::Container, container, "read logs of")),
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        let err = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: x".to_string(),
        };
        let mapped = classify(err, ResourceKind::Container, "x", "remove");
        assert!(mapped.is_not_found());
    }

    #[test]
    fn test_classify_conflict() {
        let err = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "name already in use".to_string(),
        };
        let mapped = classify(err, ResourceKind::Container, "kess-app-a", "create");
        assert!(mapped.is_conflict());
        assert_eq!(mapped.to_string(), "container 'kess-app-a' already exists");
    }

    #[test]
    fn test_classify_other() {
        let err = BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        let mapped = classify(err, ResourceKind::Network, "kess", "create");
        assert!(matches!(mapped, EngineError::Api { .. }));
        assert!(mapped.to_string().contains("create network 'kess'"));
    }

    #[test]
    fn test_label_filters() {
        let filters = label_filters(&LabelFilter::group());
        assert_eq!(filters["label"], vec!["kess".to_string()]);
    }
}
