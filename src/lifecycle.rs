//! Idempotent resource primitives on top of a [`ContainerEngine`].
//!
//! Shared infrastructure (networks, volumes) is create-if-absent and every
//! removal is remove-if-present. Containers are the exception on the create
//! side: a name collision is reported as [`RuntimeError::ContainerExists`]
//! because container names are caller-chosen identities.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;

use crate::engine::{ContainerEngine, ContainerSpec, CreateContainer, parse_port_specs};
use crate::error::{Result, RuntimeError};
use crate::labels::{Labels, TOOLS_LABEL};
use crate::naming::{self, Vars};

/// Throwaway container used to reach into a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperContainer {
    /// Name template; `{Time}` is filled with the current unix time.
    pub name: String,
    pub image: String,
    /// Command that keeps the helper alive while the archive is uploaded.
    pub cmd: Vec<String>,
}

/// Split a `volume:/mount/path[:mode]` bind into its volume and mount path.
pub fn split_bind(bind: &str) -> Option<(&str, &str)> {
    let (volume, rest) = bind.split_once(':')?;
    let path = rest.split(':').next()?;
    if volume.is_empty() || !path.starts_with('/') {
        return None;
    }
    Some((volume, path))
}

/// Lifecycle manager for labeled engine resources.
#[derive(Clone)]
pub struct ResourceManager {
    engine: Arc<dyn ContainerEngine>,
    debug: bool,
}

impl ResourceManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, debug: bool) -> Self {
        Self { engine, debug }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Create the network unless one with that name exists.
    pub async fn ensure_network(&self, name: &str) -> Result<()> {
        let failed = |e: crate::engine::EngineError| RuntimeError::NetworkCreationFailed {
            name: name.to_string(),
            reason: e.to_string(),
        };

        if self.engine.network_exists(name).await.map_err(failed)? {
            tracing::debug!("Network {} already exists", name);
            return Ok(());
        }

        match self.engine.create_network(name, &Labels::base()).await {
            Ok(()) => {
                tracing::info!("Created network {}", name);
                Ok(())
            }
            // Lost a race with another creator; the network is there either way.
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(failed(e)),
        }
    }

    /// Create the volume unless one with that name exists.
    pub async fn ensure_volume(&self, name: &str) -> Result<()> {
        let failed = |e: crate::engine::EngineError| RuntimeError::VolumeCreationFailed {
            name: name.to_string(),
            reason: e.to_string(),
        };

        if self.engine.volume_exists(name).await.map_err(failed)? {
            tracing::debug!("Volume {} already exists", name);
            return Ok(());
        }

        match self.engine.create_volume(name, &Labels::base()).await {
            Ok(()) => {
                tracing::info!("Created volume {}", name);
                Ok(())
            }
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(failed(e)),
        }
    }

    /// Pull the image if it is not present locally.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        let exists = self
            .engine
            .image_exists(image)
            .await
            .map_err(|e| RuntimeError::ImagePullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        if exists {
            tracing::debug!("Image '{}' exists locally", image);
            return Ok(());
        }

        tracing::info!("Pulling image: {}", image);

        let mut stream = self.engine.pull_image(image);
        while let Some(item) = stream.next().await {
            match item {
                Ok(status) => {
                    if self.debug {
                        println!("{status}");
                    } else {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::ImagePullFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    /// Pull if needed, create with restart policy `always`, then start.
    ///
    /// Returns the container id.
    pub async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.ensure_image(&spec.image).await?;

        let ports =
            parse_port_specs(&spec.ports).map_err(|e| RuntimeError::ContainerCreationFailed {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;

        let request = CreateContainer {
            name: spec.name.clone(),
            image: spec.image.clone(),
            cmd: spec.cmd.clone(),
            network_mode: spec.network.clone(),
            ports,
            binds: spec.volumes.clone(),
            labels: spec.labels.clone(),
            restart_always: true,
        };

        let id = match self.engine.create_container(&request).await {
            Ok(id) => id,
            Err(e) if e.is_conflict() => {
                return Err(RuntimeError::ContainerExists {
                    name: spec.name.clone(),
                });
            }
            Err(e) => {
                return Err(RuntimeError::ContainerCreationFailed {
                    name: spec.name.clone(),
                    reason: e.to_string(),
                });
            }
        };

        self.engine
            .start_container(&id)
            .await
            .map_err(|e| RuntimeError::ContainerStartFailed {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!("Started container {}", spec.name);
        Ok(id)
    }

    /// Force-remove a container; absent containers are fine.
    pub async fn remove_container(&self, name: &str) -> Result<()> {
        match self.engine.remove_container(name).await {
            Ok(()) => {
                tracing::info!("Removed container {}", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("Container {} not found, nothing to remove", name);
                Ok(())
            }
            Err(e) => Err(RuntimeError::ContainerRemovalFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Remove a volume; absent volumes are fine.
    pub async fn remove_volume(&self, name: &str) -> Result<()> {
        match self.engine.remove_volume(name).await {
            Ok(()) => {
                tracing::info!("Removed volume {}", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(RuntimeError::VolumeRemovalFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Remove a network; absent networks are fine.
    pub async fn remove_network(&self, name: &str) -> Result<()> {
        match self.engine.remove_network(name).await {
            Ok(()) => {
                tracing::info!("Removed network {}", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(RuntimeError::NetworkRemovalFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Unpack `archive` into the volume named by `bind` (`volume:/path`).
    ///
    /// A helper container mounts the volume for the duration of the upload
    /// and is removed afterwards, also when the upload fails.
    pub async fn copy_into_volume(
        &self,
        helper: &HelperContainer,
        bind: &str,
        archive: Bytes,
    ) -> Result<()> {
        let (volume, path) = split_bind(bind).ok_or_else(|| RuntimeError::InvalidOptions {
            reason: format!("volume bind '{bind}' must look like <volume>:/<path>"),
        })?;

        let name = naming::render(&helper.name, &Vars::now());
        let spec = ContainerSpec {
            name: name.clone(),
            image: helper.image.clone(),
            cmd: helper.cmd.clone(),
            network: None,
            ports: Vec::new(),
            volumes: vec![bind.to_string()],
            labels: Labels::with([(TOOLS_LABEL, "")]),
        };
        self.run_container(&spec).await?;

        let upload = self.engine.upload_archive(&name, path, archive).await;
        let cleanup = self.remove_container(&name).await;

        upload.map_err(|e| RuntimeError::CopyToVolumeFailed {
            volume: volume.to_string(),
            reason: e.to_string(),
        })?;
        cleanup?;

        tracing::info!("Copied configuration into volume {}", volume);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{GROUP_LABEL, LabelFilter};
    use crate::testing::FakeEngine;

    fn manager(engine: &Arc<FakeEngine>) -> ResourceManager {
        ResourceManager::new(engine.clone(), false)
    }

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "redis:alpine".to_string(),
            cmd: vec!["redis-server".to_string()],
            network: Some("kess".to_string()),
            ports: vec!["50003:6379".to_string()],
            volumes: Vec::new(),
            labels: Labels::system("redis"),
        }
    }

    fn helper() -> HelperContainer {
        HelperContainer {
            name: "kess-tools-{Time}".to_string(),
            image: "alpine:latest".to_string(),
            cmd: vec!["sleep".to_string(), "infinity".to_string()],
        }
    }

    #[test]
    fn test_split_bind() {
        assert_eq!(
            split_bind("kess-configs:/kess-configs"),
            Some(("kess-configs", "/kess-configs"))
        );
        assert_eq!(split_bind("data:/data:ro"), Some(("data", "/data")));
        assert_eq!(split_bind("no-path"), None);
        assert_eq!(split_bind(":/x"), None);
        assert_eq!(split_bind("v:relative"), None);
    }

    #[tokio::test]
    async fn test_ensure_network_twice_creates_one() {
        let engine = Arc::new(FakeEngine::new());
        let rm = manager(&engine);

        rm.ensure_network("kess").await.unwrap();
        rm.ensure_network("kess").await.unwrap();

        assert_eq!(engine.network_names(), vec!["kess".to_string()]);
        assert_eq!(engine.count_ops("create_network"), 1);
    }

    #[tokio::test]
    async fn test_ensure_volume_twice_creates_one() {
        let engine = Arc::new(FakeEngine::new());
        let rm = manager(&engine);

        rm.ensure_volume("kess-configs").await.unwrap();
        rm.ensure_volume("kess-configs").await.unwrap();

        assert_eq!(engine.volume_names(), vec!["kess-configs".to_string()]);
        assert_eq!(engine.count_ops("create_volume"), 1);
    }

    #[tokio::test]
    async fn test_ensured_resources_are_labeled() {
        let engine = Arc::new(FakeEngine::new());
        let rm = manager(&engine);

        rm.ensure_network("kess").await.unwrap();
        rm.ensure_volume("kess-configs").await.unwrap();

        let filter = LabelFilter::group();
        assert_eq!(engine.list_networks(&filter).await.unwrap().len(), 1);
        assert_eq!(engine.list_volumes(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_resources_succeeds() {
        let engine = Arc::new(FakeEngine::new());
        let rm = manager(&engine);

        rm.remove_container("ghost").await.unwrap();
        rm.remove_volume("ghost").await.unwrap();
        rm.remove_network("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_run_container_pulls_missing_image() {
        let engine = Arc::new(FakeEngine::new());
        let rm = manager(&engine);
        rm.ensure_network("kess").await.unwrap();

        rm.run_container(&spec("kess-system-redis")).await.unwrap();

        assert_eq!(engine.count_ops("pull_image"), 1);
        let container = engine.container("kess-system-redis").unwrap();
        assert!(container.running);
        assert!(container.request.restart_always);
        assert!(container.request.ports.exposed.contains("6379/tcp"));
        assert_eq!(
            container.request.labels.get(GROUP_LABEL).map(String::as_str),
            Some("")
        );
    }

    #[tokio::test]
    async fn test_run_container_skips_pull_for_local_image() {
        let engine = Arc::new(FakeEngine::new().with_image("redis:alpine"));
        let rm = manager(&engine);
        rm.ensure_network("kess").await.unwrap();

        rm.run_container(&spec("kess-system-redis")).await.unwrap();

        assert_eq!(engine.count_ops("pull_image"), 0);
    }

    #[tokio::test]
    async fn test_run_container_duplicate_is_an_error() {
        let engine = Arc::new(FakeEngine::new());
        let rm = manager(&engine);
        rm.ensure_network("kess").await.unwrap();

        rm.run_container(&spec("kess-app-a")).await.unwrap();
        let err = rm.run_container(&spec("kess-app-a")).await.unwrap_err();

        assert!(matches!(err, RuntimeError::ContainerExists { ref name } if name == "kess-app-a"));
    }

    #[tokio::test]
    async fn test_run_container_pull_failure() {
        let engine = Arc::new(FakeEngine::new().with_unpullable("redis:alpine"));
        let rm = manager(&engine);

        let err = rm.run_container(&spec("kess-system-redis")).await.unwrap_err();

        assert!(matches!(err, RuntimeError::ImagePullFailed { .. }));
        assert!(engine.container("kess-system-redis").is_none());
    }

    #[tokio::test]
    async fn test_engine_failure_names_resource_and_cause() {
        let engine = Arc::new(FakeEngine::new());
        engine.fail_on("start_container");
        let rm = manager(&engine);
        rm.ensure_network("kess").await.unwrap();

        let err = rm.run_container(&spec("kess-system-redis")).await.unwrap_err();

        assert!(
            matches!(err, RuntimeError::ContainerStartFailed { ref name, .. } if name == "kess-system-redis")
        );
        let message = err.to_string();
        assert!(message.contains("kess-system-redis"), "{message}");
        assert!(message.contains("injected failure"), "{message}");
    }

    #[tokio::test]
    async fn test_run_container_bad_port_spec() {
        let engine = Arc::new(FakeEngine::new());
        let rm = manager(&engine);
        let mut bad = spec("kess-system-redis");
        bad.ports = vec!["not-a-port".to_string()];

        let err = rm.run_container(&bad).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ContainerCreationFailed { .. }));
    }

    #[tokio::test]
    async fn test_copy_into_volume_removes_helper() {
        let engine = Arc::new(FakeEngine::new());
        let rm = manager(&engine);
        rm.ensure_volume("kess-configs").await.unwrap();

        rm.copy_into_volume(
            &helper(),
            "kess-configs:/kess-configs",
            Bytes::from_static(b"archive"),
        )
        .await
        .unwrap();

        assert!(engine.container_names().is_empty());
        let uploads = engine.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].path, "/kess-configs");
        assert!(uploads[0].container.starts_with("kess-tools-"));
    }

    #[tokio::test]
    async fn test_copy_into_volume_removes_helper_on_upload_failure() {
        let engine = Arc::new(FakeEngine::new());
        engine.fail_on("upload_archive");
        let rm = manager(&engine);
        rm.ensure_volume("kess-configs").await.unwrap();

        let err = rm
            .copy_into_volume(&helper(), "kess-configs:/kess-configs", Bytes::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::CopyToVolumeFailed { .. }));
        assert!(engine.container_names().is_empty());
    }

    #[tokio::test]
    async fn test_copy_into_volume_rejects_bad_bind() {
        let engine = Arc::new(FakeEngine::new());
        let rm = manager(&engine);

        let err = rm
            .copy_into_volume(&helper(), "kess-configs", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidOptions { .. }));
    }
}
