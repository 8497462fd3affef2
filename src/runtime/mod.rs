//! Backend contract and selection.
//!
//! Every backend implements [`Runtime`]. Which one runs is decided once, from
//! the closed [`RuntimeConfig`] enum, by [`create`].

pub mod docker;
pub mod slim;
pub mod standalone;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConfigError, Result};

pub use docker::{DockerRuntime, DockerRuntimeConfig};
pub use slim::{SlimRuntime, SlimRuntimeConfig};
pub use standalone::{StandaloneRuntime, StandaloneRuntimeConfig};

/// Deploy one workload with its sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Application id; names and labels derive from it.
    pub app_id: String,
    /// Workload image (container backend only).
    pub image: Option<String>,
    /// Workload command. For the standalone backend, the app to launch.
    pub command: Vec<String>,
    /// Port the app listens on.
    pub app_port: Option<u16>,
    pub http_port: Option<u16>,
    pub grpc_port: Option<u16>,
    pub app_protocol: Option<String>,
    pub max_concurrency: Option<u32>,
    pub metrics_port: Option<u16>,
    pub enable_profiling: bool,
    pub profile_port: Option<u16>,
    pub app_ssl: bool,
    pub log_level: Option<String>,
    pub components_path: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub placement_host: Option<String>,
    /// Working directory of the app process.
    pub working_dir: Option<PathBuf>,
    /// Overrides the backend's readiness wait.
    pub wait_timeout: Option<Duration>,
}

/// Tear down one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub app_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogsOptions {
    pub app_id: String,
    pub follow: bool,
    /// Trailing lines to show; everything when unset.
    pub tail: Option<String>,
    /// Show the sidecar's output instead of the workload's.
    pub sidecar: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardOptions {
    /// Host port to publish the dashboard on.
    pub port: Option<u16>,
}

/// The contract every backend satisfies.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Short backend name, as used in messages.
    fn name(&self) -> &'static str;

    /// Bring up the shared platform services.
    async fn install(&self) -> Result<()>;

    /// Remove everything [`install`](Self::install) and [`run`](Self::run) created.
    async fn uninstall(&self) -> Result<()>;

    async fn run(&self, options: RunOptions) -> Result<()>;

    async fn remove(&self, options: RemoveOptions) -> Result<()>;

    async fn logs(&self, options: LogsOptions) -> Result<()>;

    async fn dashboard(&self, options: DashboardOptions) -> Result<()>;
}

/// Backend tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Docker,
    Standalone,
    Slim,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Standalone => "standalone",
            Self::Slim => "slim",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "standalone" | "process" => Ok(Self::Standalone),
            "slim" | "noop" => Ok(Self::Slim),
            _ => Err(ConfigError::UnknownRuntime {
                name: s.to_string(),
            }),
        }
    }
}

/// Configuration of exactly one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeConfig {
    Docker(DockerRuntimeConfig),
    Standalone(StandaloneRuntimeConfig),
    Slim(SlimRuntimeConfig),
}

impl RuntimeConfig {
    pub fn kind(&self) -> RuntimeKind {
        match self {
            Self::Docker(_) => RuntimeKind::Docker,
            Self::Standalone(_) => RuntimeKind::Standalone,
            Self::Slim(_) => RuntimeKind::Slim,
        }
    }

    /// Default configuration for a backend tag.
    pub fn for_kind(kind: RuntimeKind) -> Self {
        match kind {
            RuntimeKind::Docker => Self::Docker(DockerRuntimeConfig::default()),
            RuntimeKind::Standalone => Self::Standalone(StandaloneRuntimeConfig::default()),
            RuntimeKind::Slim => Self::Slim(SlimRuntimeConfig::default()),
        }
    }
}

/// Construct the backend selected by `config`.
///
/// Each constructor applies its own defaults. The Docker backend connects to
/// the engine here, so an unreachable daemon fails construction.
pub async fn create(config: RuntimeConfig) -> Result<Box<dyn Runtime>> {
    tracing::debug!("Creating {} runtime", config.kind());
    let runtime: Box<dyn Runtime> = match config {
        RuntimeConfig::Docker(c) => Box::new(DockerRuntime::connect(c).await?),
        RuntimeConfig::Standalone(c) => Box::new(StandaloneRuntime::new(c)),
        RuntimeConfig::Slim(c) => Box::new(SlimRuntime::new(c)),
    };
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_kind_parsing() {
        assert_eq!("docker".parse::<RuntimeKind>().unwrap(), RuntimeKind::Docker);
        assert_eq!(
            "Standalone".parse::<RuntimeKind>().unwrap(),
            RuntimeKind::Standalone
        );
        assert_eq!(
            "process".parse::<RuntimeKind>().unwrap(),
            RuntimeKind::Standalone
        );
        assert_eq!("noop".parse::<RuntimeKind>().unwrap(), RuntimeKind::Slim);
    }

    #[test]
    fn test_unknown_runtime_kind() {
        let err = "kubernetes".parse::<RuntimeKind>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRuntime { ref name } if name == "kubernetes"));
    }

    #[test]
    fn test_config_kind_matches_variant() {
        for kind in [RuntimeKind::Docker, RuntimeKind::Standalone, RuntimeKind::Slim] {
            assert_eq!(RuntimeConfig::for_kind(kind).kind(), kind);
        }
    }

    #[tokio::test]
    async fn test_create_slim_and_standalone() {
        let slim = create(RuntimeConfig::Slim(SlimRuntimeConfig::default()))
            .await
            .unwrap();
        assert_eq!(slim.name(), "slim");

        let standalone = create(RuntimeConfig::Standalone(
            StandaloneRuntimeConfig::default(),
        ))
        .await
        .unwrap();
        assert_eq!(standalone.name(), "standalone");
    }
}
