//! Container engine capability.
//!
//! kess never talks to Docker directly outside this module. Everything above
//! it goes through [`ContainerEngine`], which keeps the lifecycle rules
//! (idempotence, labeling, ordering) testable against an in-memory engine.

pub mod docker;
pub mod error;
pub mod ports;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::labels::LabelFilter;

pub use docker::{DockerEngine, connect_docker};
pub use error::{EngineError, ResourceKind, Result};
pub use ports::{HostBinding, PortMappings, parse_port_specs};

/// Declarative description of a container to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Unique container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command arguments; empty keeps the image default.
    pub cmd: Vec<String>,
    /// Network mode: a network name or `container:<name>`.
    pub network: Option<String>,
    /// Port specs, `host:container` style.
    pub ports: Vec<String>,
    /// Volume binds, `volume:/path` style.
    pub volumes: Vec<String>,
    /// Labels, including the group marker.
    pub labels: HashMap<String, String>,
}

/// Fully resolved create request handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContainer {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub network_mode: Option<String>,
    pub ports: PortMappings,
    pub binds: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Restart the container whenever it exits.
    pub restart_always: bool,
}

/// A listed resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    /// Engine id (equal to the name for volumes).
    pub id: String,
    pub name: String,
}

/// Options for reading container logs.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Keep streaming new output.
    pub follow: bool,
    /// Number of trailing lines, `None` for everything.
    pub tail: Option<String>,
}

/// Operations kess needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the engine responds.
    async fn ping(&self) -> Result<()>;

    /// Whether the image is present locally.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull an image; yields human readable progress lines.
    fn pull_image<'a>(&'a self, image: &'a str) -> BoxStream<'a, Result<String>>;

    /// Create a container, returning its id.
    async fn create_container(&self, request: &CreateContainer) -> Result<String>;

    async fn start_container(&self, name: &str) -> Result<()>;

    /// Force-remove a container along with its anonymous volumes.
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// All containers (running or not) matching the filter.
    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ResourceSummary>>;

    async fn network_exists(&self, name: &str) -> Result<bool>;

    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()>;

    async fn remove_network(&self, name: &str) -> Result<()>;

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<ResourceSummary>>;

    async fn volume_exists(&self, name: &str) -> Result<bool>;

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()>;

    async fn remove_volume(&self, name: &str) -> Result<()>;

    async fn list_volumes(&self, filter: &LabelFilter) -> Result<Vec<ResourceSummary>>;

    /// Extract a tar archive into `path` inside the container.
    async fn upload_archive(&self, container: &str, path: &str, archive: Bytes) -> Result<()>;

    /// Stream container output, one chunk per item.
    fn logs<'a>(&'a self, container: &'a str, options: LogOptions)
    -> BoxStream<'a, Result<String>>;
}
