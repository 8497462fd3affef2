//! Docker backend configuration and its defaults.
//!
//! Every field may be left empty in the config file. `apply_defaults` fills
//! what is unset and leaves explicit values alone. Names and command lines
//! are templates; see [`crate::naming`].

use std::path::PathBuf;

use serde::Deserialize;

use crate::config::default_config_dir;
use crate::lifecycle::HelperContainer;

pub const DEFAULT_NETWORK: &str = "kess";
pub const DEFAULT_CONFIG_VOLUME: &str = "kess-configs";
pub const DEFAULT_CONFIG_MOUNT: &str = "/kess-configs";

pub const DEFAULT_TOOLS_NAME: &str = "kess-tools-{Time}";
pub const DEFAULT_TOOLS_IMAGE: &str = "alpine:latest";
pub const DEFAULT_TOOLS_CMD: &[&str] = &["sleep", "infinity"];

pub const DEFAULT_SIDECAR_IMAGE: &str = "daprio/daprd:edge";

pub const DEFAULT_APP_NAME: &str = "kess-app-{Name}";
pub const DEFAULT_SIDECAR_NAME: &str = "kess-app-{Name}-sidecar";
/// Sidecars join the network namespace of their workload container.
pub const DEFAULT_SIDECAR_NETWORK: &str = "container:{Name}";

pub const DEFAULT_DASHBOARD_NAME: &str = "kess-system-dashboard";
pub const DEFAULT_DASHBOARD_IMAGE: &str = "daprio/dashboard:latest";
pub const DEFAULT_DASHBOARD_PORT: u16 = 8080;

/// Sidecar arguments shared by the ingress and every workload sidecar.
const SIDECAR_BASE_CMD: &[&str] = &[
    "./daprd",
    "--placement-host-address",
    "{PlacementHost}",
    "--components-path",
    "{ComponentsPath}",
    "--config",
    "{ConfigFile}",
];

const INGRESS_EXTRA_CMD: &[&str] = &[
    "--app-id",
    "ingress",
    "--dapr-grpc-port",
    "50001",
    "--dapr-http-port",
    "50002",
];

/// Built-in values for one platform service.
struct ServiceDefaults {
    name: &'static str,
    image: &'static str,
    cmd: &'static [&'static str],
    ports: &'static [&'static str],
    external_host: &'static str,
    internal_host: &'static str,
}

const REDIS: ServiceDefaults = ServiceDefaults {
    name: "kess-system-redis",
    image: "redis:alpine",
    cmd: &["redis-server"],
    ports: &["50003:6379"],
    external_host: "localhost:50003",
    internal_host: "kess-system-redis:6379",
};

// Zipkin runs its image entrypoint as is.
const ZIPKIN: ServiceDefaults = ServiceDefaults {
    name: "kess-system-zipkin",
    image: "openzipkin/zipkin:latest",
    cmd: &[],
    ports: &["50004:9411"],
    external_host: "localhost:50004",
    internal_host: "kess-system-zipkin:9411",
};

const PLACEMENT: ServiceDefaults = ServiceDefaults {
    name: "kess-system-placement",
    image: "daprio/dapr",
    cmd: &["./placement"],
    ports: &["50005:50005"],
    external_host: "localhost:50005",
    internal_host: "kess-system-placement:50005",
};

const INGRESS_NAME: &str = "kess-system-ingress";
const INGRESS_PORTS: &[&str] = &["50001:50001", "50002:50002"];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn fill(field: &mut String, default: &str) {
    if field.is_empty() {
        *field = default.to_string();
    }
}

fn fill_list(field: &mut Vec<String>, default: &[&str]) {
    if field.is_empty() {
        *field = strings(default);
    }
}

fn config_bind() -> String {
    format!("{DEFAULT_CONFIG_VOLUME}:{DEFAULT_CONFIG_MOUNT}")
}

/// A shared platform service container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub network: String,
    pub ports: Vec<String>,
    /// Address reachable from the host.
    pub external_host: String,
    /// Address reachable from the shared network.
    pub internal_host: String,
}

impl ServiceConfig {
    fn apply_defaults(&mut self, defaults: &ServiceDefaults, network: &str) {
        fill(&mut self.name, defaults.name);
        fill(&mut self.image, defaults.image);
        fill_list(&mut self.cmd, defaults.cmd);
        fill(&mut self.network, network);
        fill_list(&mut self.ports, defaults.ports);
        fill(&mut self.external_host, defaults.external_host);
        fill(&mut self.internal_host, defaults.internal_host);
    }
}

/// The Redis store; an empty password means none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub service: ServiceConfig,
    pub password: String,
}

/// Helper image used to reach into volumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
}

impl ToolsConfig {
    fn apply_defaults(&mut self) {
        fill(&mut self.name, DEFAULT_TOOLS_NAME);
        fill(&mut self.image, DEFAULT_TOOLS_IMAGE);
        fill_list(&mut self.cmd, DEFAULT_TOOLS_CMD);
    }

    pub fn helper(&self) -> HelperContainer {
        HelperContainer {
            name: self.name.clone(),
            image: self.image.clone(),
            cmd: self.cmd.clone(),
        }
    }
}

/// The ingress sidecar. `cmd` may use `{PlacementHost}`, `{ComponentsPath}`
/// and `{ConfigFile}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub network: String,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
}

impl IngressConfig {
    fn apply_defaults(&mut self, network: &str) {
        fill(&mut self.name, INGRESS_NAME);
        fill(&mut self.image, DEFAULT_SIDECAR_IMAGE);
        if self.cmd.is_empty() {
            self.cmd = strings(SIDECAR_BASE_CMD);
            self.cmd.extend(strings(INGRESS_EXTRA_CMD));
        }
        fill(&mut self.network, network);
        fill_list(&mut self.ports, INGRESS_PORTS);
        if self.volumes.is_empty() {
            self.volumes = vec![config_bind()];
        }
    }
}

/// Per-workload sidecar. `name` and `network` use `{Name}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub network: String,
    pub volumes: Vec<String>,
}

impl SidecarConfig {
    fn apply_defaults(&mut self) {
        fill(&mut self.name, DEFAULT_SIDECAR_NAME);
        fill(&mut self.image, DEFAULT_SIDECAR_IMAGE);
        fill_list(&mut self.cmd, SIDECAR_BASE_CMD);
        fill(&mut self.network, DEFAULT_SIDECAR_NETWORK);
        if self.volumes.is_empty() {
            self.volumes = vec![config_bind()];
        }
    }
}

/// Workload container. Image and command come from the run options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub network: String,
    pub volumes: Vec<String>,
}

impl AppConfig {
    fn apply_defaults(&mut self, network: &str) {
        fill(&mut self.name, DEFAULT_APP_NAME);
        fill(&mut self.network, network);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub name: String,
    pub image: String,
    pub network: String,
    /// Port the dashboard listens on inside its container.
    pub container_port: u16,
}

impl DashboardConfig {
    fn apply_defaults(&mut self, network: &str) {
        fill(&mut self.name, DEFAULT_DASHBOARD_NAME);
        fill(&mut self.image, DEFAULT_DASHBOARD_IMAGE);
        fill(&mut self.network, network);
        if self.container_port == 0 {
            self.container_port = DEFAULT_DASHBOARD_PORT;
        }
    }
}

/// Settings of the Docker backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DockerRuntimeConfig {
    /// Print image pull progress.
    pub debug: bool,
    /// Shared network of the platform services.
    pub network: String,
    /// Volumes created on install.
    pub volumes: Vec<String>,
    /// Volume whose mount receives the in-network manifests.
    pub config_volume: String,
    /// Where manifests addressed to host ports are written.
    pub manifest_dir: PathBuf,
    pub tools: ToolsConfig,
    pub redis: StoreConfig,
    pub zipkin: ServiceConfig,
    pub placement: ServiceConfig,
    pub ingress: IngressConfig,
    pub sidecar: SidecarConfig,
    pub app: AppConfig,
    pub dashboard: DashboardConfig,
}

impl DockerRuntimeConfig {
    pub fn apply_defaults(&mut self) {
        fill(&mut self.network, DEFAULT_NETWORK);
        fill_list(&mut self.volumes, &[DEFAULT_CONFIG_VOLUME]);
        fill(&mut self.config_volume, DEFAULT_CONFIG_VOLUME);
        if self.manifest_dir.as_os_str().is_empty() {
            self.manifest_dir = default_config_dir();
        }

        let network = self.network.clone();
        self.tools.apply_defaults();
        self.redis.service.apply_defaults(&REDIS, &network);
        self.zipkin.apply_defaults(&ZIPKIN, &network);
        self.placement.apply_defaults(&PLACEMENT, &network);
        self.ingress.apply_defaults(&network);
        self.sidecar.apply_defaults();
        self.app.apply_defaults(&network);
        self.dashboard.apply_defaults(&network);
    }
}
