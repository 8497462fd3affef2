//! Test doubles for the engine and the standalone backend's collaborators.
//!
//! Provides:
//! - [`FakeEngine`]: an in-memory [`ContainerEngine`] with Docker's naming,
//!   conflict and in-use rules, an operation log and failure injection
//! - [`StubProbe`], [`StubMetadata`]: readiness and metadata clients that
//!   record their calls
//! - [`StubProcess`]: a [`KillTarget`] that counts kill requests
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kess::runtime::{DockerRuntime, DockerRuntimeConfig, Runtime};
//! use kess::testing::FakeEngine;
//!
//! # async fn demo() {
//! let engine = Arc::new(FakeEngine::new());
//! let runtime = DockerRuntime::with_engine(DockerRuntimeConfig::default(), engine.clone());
//! runtime.install().await.unwrap();
//! assert_eq!(engine.container_names().len(), 4);
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use crate::engine::{
    ContainerEngine, CreateContainer, EngineError, LogOptions, ResourceKind, ResourceSummary,
    Result,
};
use crate::labels::LabelFilter;
use crate::lifecycle::split_bind;
use crate::runtime::standalone::{KillTarget, MetadataClient, PortProbe, ProcessError};

/// Network modes Docker provides without creating anything.
const BUILTIN_NETWORKS: &[&str] = &["bridge", "host", "none", "default"];

/// A container held by [`FakeEngine`].
#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub request: CreateContainer,
    pub running: bool,
}

/// An archive handed to [`ContainerEngine::upload_archive`].
#[derive(Debug, Clone)]
pub struct Upload {
    pub container: String,
    pub path: String,
    pub archive: Bytes,
}

#[derive(Debug, Clone)]
struct Labeled {
    id: String,
    name: String,
    labels: HashMap<String, String>,
}

impl Labeled {
    fn is(&self, key: &str) -> bool {
        self.id == key || self.name == key
    }

    fn summary(&self) -> ResourceSummary {
        ResourceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    images: HashSet<String>,
    unpullable: HashSet<String>,
    containers: Vec<FakeContainer>,
    networks: Vec<Labeled>,
    volumes: Vec<Labeled>,
    uploads: Vec<Upload>,
    logs: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    ops: Vec<(String, String)>,
    next_id: u64,
}

impl State {
    fn record(&mut self, op: &str, target: &str) -> Result<()> {
        self.ops.push((op.to_string(), target.to_string()));
        if self.failing.contains(op) || self.failing.contains(&format!("{op}:{target}")) {
            return Err(EngineError::Api {
                operation: format!("{op} {target}"),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn container(&self, key: &str) -> Option<usize> {
        self.containers
            .iter()
            .position(|c| c.id == key || c.request.name == key)
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:012x}", self.next_id)
    }
}

/// In-memory container engine.
///
/// Images pull instantly unless marked unpullable. Creating a container
/// requires its image and network to exist, `container:<name>` modes require
/// the target container, and named volumes in binds are created unlabeled
/// on demand. Volumes and networks in use by a container cannot be removed.
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an image as already present locally.
    pub fn with_image(self, image: &str) -> Self {
        self.state().images.insert(image.to_string());
        self
    }

    /// Make every pull of `image` fail.
    pub fn with_unpullable(self, image: &str) -> Self {
        self.state().unpullable.insert(image.to_string());
        self
    }

    /// Fail every call of `op`, or only calls on one target with `op:target`.
    pub fn fail_on(&self, op: &str) {
        self.state().failing.insert(op.to_string());
    }

    /// Lines returned by [`ContainerEngine::logs`] for a container.
    pub fn set_logs(&self, container: &str, lines: &[&str]) {
        self.state().logs.insert(
            container.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current container names, in creation order.
    pub fn container_names(&self) -> Vec<String> {
        self.state()
            .containers
            .iter()
            .map(|c| c.request.name.clone())
            .collect()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        let state = self.state();
        state.container(name).map(|i| state.containers[i].clone())
    }

    pub fn network_names(&self) -> Vec<String> {
        self.state().networks.iter().map(|n| n.name.clone()).collect()
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.state().volumes.iter().map(|v| v.name.clone()).collect()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.state().uploads.clone()
    }

    /// How many times `op` was called.
    pub fn count_ops(&self, op: &str) -> usize {
        self.state().ops.iter().filter(|(o, _)| o == op).count()
    }

    /// Targets of each `op` call, in call order.
    pub fn ops_on(&self, op: &str) -> Vec<String> {
        self.state()
            .ops
            .iter()
            .filter(|(o, _)| o == op)
            .map(|(_, target)| target.clone())
            .collect()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<()> {
        self.state().record("ping", "")
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let mut state = self.state();
        state.record("image_exists", image)?;
        Ok(state.images.contains(image))
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> BoxStream<'a, Result<String>> {
        let mut state = self.state();
        let items = match state.record("pull_image", image) {
            Err(e) => vec![Err(e)],
            Ok(()) if state.unpullable.contains(image) => vec![
                Ok(format!("Pulling from {image}")),
                Err(EngineError::Api {
                    operation: format!("pull {image}"),
                    reason: "manifest unknown".to_string(),
                }),
            ],
            Ok(()) => {
                state.images.insert(image.to_string());
                vec![
                    Ok(format!("Pulling from {image}")),
                    Ok(format!("Status: Downloaded newer image for {image}")),
                ]
            }
        };
        stream::iter(items).boxed()
    }

    async fn create_container(&self, request: &CreateContainer) -> Result<String> {
        let mut state = self.state();
        state.record("create_container", &request.name)?;

        if !state.images.contains(&request.image) {
            return Err(EngineError::NotFound {
                kind: ResourceKind::Image,
                name: request.image.clone(),
            });
        }
        if state.container(&request.name).is_some() {
            return Err(EngineError::Conflict {
                kind: ResourceKind::Container,
                name: request.name.clone(),
            });
        }

        match request.network_mode.as_deref() {
            Some(mode) if mode.starts_with("container:") => {
                let target = &mode["container:".len()..];
                if state.container(target).is_none() {
                    return Err(EngineError::Api {
                        operation: format!("create container {}", request.name),
                        reason: format!("No such container: {target}"),
                    });
                }
            }
            Some(network) if !BUILTIN_NETWORKS.contains(&network) => {
                if !state.networks.iter().any(|n| n.is(network)) {
                    return Err(EngineError::NotFound {
                        kind: ResourceKind::Network,
                        name: network.to_string(),
                    });
                }
            }
            _ => {}
        }

        for bind in &request.binds {
            if let Some((volume, _)) = split_bind(bind)
                && !volume.starts_with(['/', '.'])
                && !state.volumes.iter().any(|v| v.is(volume))
            {
                state.volumes.push(Labeled {
                    id: volume.to_string(),
                    name: volume.to_string(),
                    labels: HashMap::new(),
                });
            }
        }

        let id = state.next_id("c");
        state.containers.push(FakeContainer {
            id: id.clone(),
            request: request.clone(),
            running: false,
        });
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.record("start_container", name)?;
        let index = state.container(name).ok_or_else(|| EngineError::NotFound {
            kind: ResourceKind::Container,
            name: name.to_string(),
        })?;
        state.containers[index].running = true;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.record("remove_container", name)?;
        let index = state.container(name).ok_or_else(|| EngineError::NotFound {
            kind: ResourceKind::Container,
            name: name.to_string(),
        })?;
        state.containers.remove(index);
        Ok(())
    }

    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ResourceSummary>> {
        let mut state = self.state();
        state.record("list_containers", &filter.expression())?;
        Ok(state
            .containers
            .iter()
            .filter(|c| filter.matches(&c.request.labels))
            .map(|c| ResourceSummary {
                id: c.id.clone(),
                name: c.request.name.clone(),
            })
            .collect())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state();
        state.record("network_exists", name)?;
        Ok(state.networks.iter().any(|n| n.is(name)))
    }

    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let mut state = self.state();
        state.record("create_network", name)?;
        if state.networks.iter().any(|n| n.is(name)) {
            return Err(EngineError::Conflict {
                kind: ResourceKind::Network,
                name: name.to_string(),
            });
        }
        let id = state.next_id("n");
        state.networks.push(Labeled {
            id,
            name: name.to_string(),
            labels: labels.clone(),
        });
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.record("remove_network", name)?;
        let index = state
            .networks
            .iter()
            .position(|n| n.is(name))
            .ok_or_else(|| EngineError::NotFound {
                kind: ResourceKind::Network,
                name: name.to_string(),
            })?;

        let network = state.networks[index].name.clone();
        if state
            .containers
            .iter()
            .any(|c| c.request.network_mode.as_deref() == Some(network.as_str()))
        {
            return Err(EngineError::Api {
                operation: format!("remove network {network}"),
                reason: "network has active endpoints".to_string(),
            });
        }
        state.networks.remove(index);
        Ok(())
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<ResourceSummary>> {
        let mut state = self.state();
        state.record("list_networks", &filter.expression())?;
        Ok(state
            .networks
            .iter()
            .filter(|n| filter.matches(&n.labels))
            .map(Labeled::summary)
            .collect())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state();
        state.record("volume_exists", name)?;
        Ok(state.volumes.iter().any(|v| v.is(name)))
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let mut state = self.state();
        state.record("create_volume", name)?;
        if state.volumes.iter().any(|v| v.is(name)) {
            return Err(EngineError::Conflict {
                kind: ResourceKind::Volume,
                name: name.to_string(),
            });
        }
        state.volumes.push(Labeled {
            id: name.to_string(),
            name: name.to_string(),
            labels: labels.clone(),
        });
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.record("remove_volume", name)?;
        let index = state
            .volumes
            .iter()
            .position(|v| v.is(name))
            .ok_or_else(|| EngineError::NotFound {
                kind: ResourceKind::Volume,
                name: name.to_string(),
            })?;

        let in_use = state.containers.iter().any(|c| {
            c.request
                .binds
                .iter()
                .any(|b| split_bind(b).is_some_and(|(v, _)| v == name))
        });
        if in_use {
            return Err(EngineError::Api {
                operation: format!("remove volume {name}"),
                reason: "volume is in use".to_string(),
            });
        }
        state.volumes.remove(index);
        Ok(())
    }

    async fn list_volumes(&self, filter: &LabelFilter) -> Result<Vec<ResourceSummary>> {
        let mut state = self.state();
        state.record("list_volumes", &filter.expression())?;
        Ok(state
            .volumes
            .iter()
            .filter(|v| filter.matches(&v.labels))
            .map(Labeled::summary)
            .collect())
    }

    async fn upload_archive(&self, container: &str, path: &str, archive: Bytes) -> Result<()> {
        let mut state = self.state();
        state.record("upload_archive", container)?;
        match state.container(container) {
            Some(i) if state.containers[i].running => {}
            Some(_) => {
                return Err(EngineError::Api {
                    operation: format!("upload to {container}"),
                    reason: "container is not running".to_string(),
                });
            }
            None => {
                return Err(EngineError::NotFound {
                    kind: ResourceKind::Container,
                    name: container.to_string(),
                });
            }
        }
        state.uploads.push(Upload {
            container: container.to_string(),
            path: path.to_string(),
            archive,
        });
        Ok(())
    }

    fn logs<'a>(
        &'a self,
        container: &'a str,
        _options: LogOptions,
    ) -> BoxStream<'a, Result<String>> {
        let mut state = self.state();
        let items: Vec<Result<String>> = match state.record("logs", container) {
            Err(e) => vec![Err(e)],
            Ok(()) if state.container(container).is_none() => vec![Err(EngineError::NotFound {
                kind: ResourceKind::Container,
                name: container.to_string(),
            })],
            Ok(()) => state
                .logs
                .get(container)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(Ok)
                .collect(),
        };
        stream::iter(items).boxed()
    }
}

/// Readiness probe that answers immediately and records probed ports.
#[derive(Debug, Default)]
pub struct StubProbe {
    ports: Mutex<Vec<u16>>,
    unresponsive: bool,
}

impl StubProbe {
    /// Every port reports listening.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every port reports a timeout.
    pub fn unresponsive() -> Self {
        Self {
            unresponsive: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.ports.lock().map(|p| p.len()).unwrap_or_default()
    }

    /// Probed ports, sorted.
    pub fn ports(&self) -> Vec<u16> {
        let mut ports = self.ports.lock().map(|p| p.clone()).unwrap_or_default();
        ports.sort_unstable();
        ports
    }
}

#[async_trait]
impl PortProbe for StubProbe {
    async fn wait_listening(
        &self,
        port: u16,
        timeout: Duration,
    ) -> std::result::Result<(), ProcessError> {
        if let Ok(mut ports) = self.ports.lock() {
            ports.push(port);
        }
        if self.unresponsive {
            return Err(ProcessError::NotListening { port, timeout });
        }
        Ok(())
    }
}

/// Metadata client that records every put.
#[derive(Debug, Default)]
pub struct StubMetadata {
    puts: Mutex<Vec<(u16, String, String)>>,
    failing: bool,
}

impl StubMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records puts, then fails them.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// `(port, key, value)` of every put, in order.
    pub fn puts(&self) -> Vec<(u16, String, String)> {
        self.puts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MetadataClient for StubMetadata {
    async fn put(
        &self,
        http_port: u16,
        key: &str,
        value: &str,
    ) -> std::result::Result<(), ProcessError> {
        if let Ok(mut puts) = self.puts.lock() {
            puts.push((http_port, key.to_string(), value.to_string()));
        }
        if self.failing {
            return Err(ProcessError::Metadata {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Kill target that counts kill requests.
#[derive(Debug, Default)]
pub struct StubProcess {
    kills: usize,
    failing: bool,
}

impl StubProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every kill request fails.
    pub fn failing() -> Self {
        Self {
            kills: 0,
            failing: true,
        }
    }

    pub fn kills(&self) -> usize {
        self.kills
    }
}

#[async_trait]
impl KillTarget for StubProcess {
    async fn kill(&mut self) -> std::io::Result<()> {
        self.kills += 1;
        if self.failing {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::Labels;

    fn request(name: &str, network: Option<&str>) -> CreateContainer {
        CreateContainer {
            name: name.to_string(),
            image: "img".to_string(),
            cmd: Vec::new(),
            network_mode: network.map(str::to_string),
            ports: Default::default(),
            binds: Vec::new(),
            labels: Labels::base(),
            restart_always: true,
        }
    }

    #[tokio::test]
    async fn test_create_requires_image() {
        let engine = FakeEngine::new();
        let err = engine
            .create_container(&request("a", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: ResourceKind::Image,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_container_network_mode_needs_target() {
        let engine = FakeEngine::new().with_image("img");

        assert!(
            engine
                .create_container(&request("b", Some("container:a")))
                .await
                .is_err()
        );
        engine.create_container(&request("a", None)).await.unwrap();
        engine
            .create_container(&request("b", Some("container:a")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_creates_unlabeled_volume() {
        let engine = FakeEngine::new().with_image("img");
        let mut req = request("a", None);
        req.binds = vec!["data:/data".to_string()];

        engine.create_container(&req).await.unwrap();

        assert_eq!(engine.volume_names(), vec!["data"]);
        assert!(
            engine
                .list_volumes(&LabelFilter::group())
                .await
                .unwrap()
                .is_empty()
        );
        assert!(engine.remove_volume("data").await.is_err());
    }

    #[tokio::test]
    async fn test_targeted_failure() {
        let engine = FakeEngine::new();
        engine.fail_on("create_network:broken");

        assert!(engine.create_network("broken", &Labels::base()).await.is_err());
        engine.create_network("fine", &Labels::base()).await.unwrap();
        assert_eq!(engine.ops_on("create_network"), vec!["broken", "fine"]);
    }
}
