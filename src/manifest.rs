//! Sidecar configuration and component manifests.
//!
//! A manifest set is one configuration manifest (tracing) plus one manifest
//! per component (state store, pub/sub). It is written either to a directory
//! tree or into a tar archive with the same layout:
//!
//! ```text
//! config.yaml
//! components/
//!     statestore.yaml
//!     pubsub.yaml
//! ```

use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const API_VERSION: &str = "dapr.io/v1alpha1";

/// Name of the platform configuration manifest.
pub const CONFIGURATION_NAME: &str = "kess";
/// Component name of the Redis state store.
pub const STATE_STORE_NAME: &str = "statestore";
/// Component name of the Redis pub/sub.
pub const PUBSUB_NAME: &str = "pubsub";

/// Errors while rendering or writing manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to render manifest '{name}': {reason}")]
    Render { name: String, reason: String },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build manifest archive: {0}")]
    Archive(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
}

/// Sidecar configuration manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: ConfigurationSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing: Option<TracingSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingSpec {
    pub sampling_rate: String,
    pub zipkin: ZipkinSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipkinSpec {
    pub endpoint_address: String,
}

impl Configuration {
    pub fn new(name: impl Into<String>, spec: ConfigurationSpec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: "Configuration".to_string(),
            metadata: Metadata { name: name.into() },
            spec,
        }
    }

    /// Configuration that samples every request into the Zipkin at `zipkin_host`.
    pub fn with_zipkin(name: impl Into<String>, zipkin_host: &str) -> Self {
        Self::new(
            name,
            ConfigurationSpec {
                tracing: Some(TracingSpec {
                    sampling_rate: "1".to_string(),
                    zipkin: ZipkinSpec {
                        endpoint_address: format!("http://{zipkin_host}/api/v2/spans"),
                    },
                }),
            },
        )
    }
}

/// Component manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: ComponentSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub component_type: String,
    pub metadata: Vec<MetadataItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub name: String,
    pub value: String,
}

impl MetadataItem {
    fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

impl Component {
    pub fn new(name: impl Into<String>, spec: ComponentSpec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: "Component".to_string(),
            metadata: Metadata { name: name.into() },
            spec,
        }
    }

    /// Redis-backed state store.
    pub fn redis_state_store(
        name: impl Into<String>,
        host: &str,
        password: &str,
        actor_state_store: bool,
    ) -> Self {
        Self::new(
            name,
            ComponentSpec {
                component_type: "state.redis".to_string(),
                metadata: vec![
                    MetadataItem::new("redisHost", host),
                    MetadataItem::new("redisPassword", password),
                    MetadataItem::new("actorStateStore", actor_state_store.to_string()),
                ],
            },
        )
    }

    /// Redis-backed pub/sub.
    pub fn redis_pubsub(name: impl Into<String>, host: &str, password: &str) -> Self {
        Self::new(
            name,
            ComponentSpec {
                component_type: "pubsub.redis".to_string(),
                metadata: vec![
                    MetadataItem::new("redisHost", host),
                    MetadataItem::new("redisPassword", password),
                ],
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// File names used inside a configuration root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLayout {
    pub components_dirname: String,
    pub configuration_filename: String,
}

impl Default for ManifestLayout {
    fn default() -> Self {
        Self {
            components_dirname: "components".to_string(),
            configuration_filename: "config.yaml".to_string(),
        }
    }
}

impl ManifestLayout {
    pub fn configuration_path(&self, root: &Path) -> PathBuf {
        root.join(&self.configuration_filename)
    }

    pub fn components_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.components_dirname)
    }

    /// Same paths as strings under a container mount point.
    pub fn configuration_in(&self, mount: &str) -> String {
        format!("{}/{}", mount.trim_end_matches('/'), self.configuration_filename)
    }

    pub fn components_in(&self, mount: &str) -> String {
        format!("{}/{}", mount.trim_end_matches('/'), self.components_dirname)
    }

    fn component_file(&self, component: &Component) -> String {
        format!("{}/{}.yaml", self.components_dirname, component.name())
    }
}

/// Addresses the platform manifests point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformAddresses {
    pub redis_host: String,
    pub redis_password: String,
    pub zipkin_host: String,
}

/// A configuration manifest with its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSet {
    pub configuration: Configuration,
    pub components: Vec<Component>,
    pub layout: ManifestLayout,
}

impl ManifestSet {
    /// The platform manifests: tracing into Zipkin, Redis state store
    /// (actor-enabled) and Redis pub/sub.
    pub fn platform(addresses: &PlatformAddresses) -> Self {
        Self {
            configuration: Configuration::with_zipkin(
                CONFIGURATION_NAME,
                &addresses.zipkin_host,
            ),
            components: vec![
                Component::redis_state_store(
                    STATE_STORE_NAME,
                    &addresses.redis_host,
                    &addresses.redis_password,
                    true,
                ),
                Component::redis_pubsub(
                    PUBSUB_NAME,
                    &addresses.redis_host,
                    &addresses.redis_password,
                ),
            ],
            layout: ManifestLayout::default(),
        }
    }

    /// Rendered files as (relative path, YAML) pairs.
    pub fn render(&self) -> Result<Vec<(String, String)>> {
        let mut files = Vec::with_capacity(self.components.len() + 1);

        let configuration = serde_yml::to_string(&self.configuration).map_err(|e| {
            ManifestError::Render {
                name: self.configuration.metadata.name.clone(),
                reason: e.to_string(),
            }
        })?;
        files.push((self.layout.configuration_filename.clone(), configuration));

        for component in &self.components {
            let yaml = serde_yml::to_string(component).map_err(|e| ManifestError::Render {
                name: component.name().to_string(),
                reason: e.to_string(),
            })?;
            files.push((self.layout.component_file(component), yaml));
        }

        Ok(files)
    }

    /// Write the manifests under `root`, creating directories as needed.
    pub fn save(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (relative, yaml) in self.render()? {
            let path = root.join(&relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| ManifestError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(&path, yaml).map_err(|source| ManifestError::Write {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }

        tracing::debug!("Wrote {} manifests under {}", written.len(), root.display());
        Ok(written)
    }

    /// Delete the files `save` would write. Missing files are ignored.
    pub fn remove(&self, root: &Path) -> Result<()> {
        for (relative, _) in self.render()? {
            let path = root.join(relative);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(ManifestError::Write { path, source }),
            }
        }

        // Only drop the components dir if nothing else lives there.
        let components = self.layout.components_dir(root);
        if std::fs::read_dir(&components).is_ok_and(|mut entries| entries.next().is_none()) {
            let _ = std::fs::remove_dir(&components);
        }
        Ok(())
    }

    /// Pack the manifests into an uncompressed tar archive.
    pub fn to_archive(&self) -> Result<Bytes> {
        let files = self.render()?;
        let mtime = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        let mut builder = tar::Builder::new(Vec::new());

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_mode(0o755);
        dir.set_size(0);
        dir.set_mtime(mtime);
        builder
            .append_data(
                &mut dir,
                format!("{}/", self.layout.components_dirname),
                std::io::empty(),
            )
            .map_err(ManifestError::Archive)?;

        for (relative, yaml) in files {
            let mut header = tar::Header::new_gnu();
            header.set_mode(0o644);
            header.set_size(yaml.len() as u64);
            header.set_mtime(mtime);
            builder
                .append_data(&mut header, &relative, yaml.as_bytes())
                .map_err(ManifestError::Archive)?;
        }

        let bytes = builder.into_inner().map_err(ManifestError::Archive)?;
        Ok(Bytes::from(bytes))
    }
}
