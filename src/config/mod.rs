//! Configuration loading.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults (each backend's `apply_defaults`)
//! 2. the TOML config file, one table per backend
//! 3. `KESS_*` environment variables (a `.env` file is loaded by the binary)
//! 4. command-line flags

pub(crate) mod helpers;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::runtime::{
    DockerRuntimeConfig, RuntimeConfig, RuntimeKind, SlimRuntimeConfig, StandaloneRuntimeConfig,
};
use helpers::{optional_env, parse_bool_env, parse_optional_env};

/// Name of the config file looked up in the config dir.
pub const CONFIG_FILE_NAME: &str = "kess.toml";

/// `~/.kess`, or `.kess` when there is no home directory.
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".kess"))
        .unwrap_or_else(|| PathBuf::from(".kess"))
}

/// Contents of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Backend used when none is given on the command line.
    pub runtime: Option<String>,
    pub docker: DockerRuntimeConfig,
    pub standalone: StandaloneRuntimeConfig,
    pub slim: SlimRuntimeConfig,
}

impl FileConfig {
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Load `path`, or the default file if it exists. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_dir().join(CONFIG_FILE_NAME), false),
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!("Loaded config from {}", path.display());
                Self::parse(&path, &text)
            }
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    fn into_runtime(self, kind: RuntimeKind) -> RuntimeConfig {
        match kind {
            RuntimeKind::Docker => RuntimeConfig::Docker(self.docker),
            RuntimeKind::Standalone => RuntimeConfig::Standalone(self.standalone),
            RuntimeKind::Slim => RuntimeConfig::Slim(self.slim),
        }
    }
}

/// Resolve the configuration of one backend.
///
/// The backend is `kind` if given, else `KESS_RUNTIME`, else the file's
/// `runtime` key, else Docker. `debug` forces debug output on.
pub fn resolve(
    kind: Option<RuntimeKind>,
    file: Option<&Path>,
    debug: bool,
) -> Result<RuntimeConfig, ConfigError> {
    let file = FileConfig::load(file)?;

    let kind = match kind {
        Some(kind) => kind,
        None => match optional_env("KESS_RUNTIME")?.or_else(|| file.runtime.clone()) {
            Some(name) => name.parse()?,
            None => RuntimeKind::Docker,
        },
    };

    let mut config = file.into_runtime(kind);
    apply_env_overrides(&mut config)?;
    if debug {
        set_debug(&mut config);
    }
    Ok(config)
}

fn set_debug(config: &mut RuntimeConfig) {
    match config {
        RuntimeConfig::Docker(c) => c.debug = true,
        RuntimeConfig::Standalone(c) => c.debug = true,
        RuntimeConfig::Slim(c) => c.debug = true,
    }
}

/// Apply `KESS_*` overrides to whichever backend is selected.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    let config_dir = optional_env("KESS_CONFIG_DIR")?.map(PathBuf::from);
    let redis_password = optional_env("KESS_REDIS_PASSWORD")?;

    match config {
        RuntimeConfig::Docker(c) => {
            c.debug = parse_bool_env("KESS_DEBUG", c.debug)?;
            if let Some(dir) = config_dir {
                c.manifest_dir = dir;
            }
            if let Some(network) = optional_env("KESS_NETWORK")? {
                c.network = network;
            }
            if let Some(password) = redis_password {
                c.redis.password = password;
            }
        }
        RuntimeConfig::Standalone(c) => {
            c.debug = parse_bool_env("KESS_DEBUG", c.debug)?;
            if let Some(dir) = config_dir {
                c.config_dir = dir;
            }
            c.wait_timeout_secs =
                parse_optional_env("KESS_WAIT_TIMEOUT_SECS", c.wait_timeout_secs)?;
            if let Some(host) = optional_env("KESS_PLACEMENT_HOST")? {
                c.placement_host = host;
            }
            if let Some(path) = optional_env("KESS_DAPRD_PATH")? {
                c.daprd_path = path;
            }
            if let Some(password) = redis_password {
                c.redis_password = password;
            }
        }
        RuntimeConfig::Slim(c) => {
            c.debug = parse_bool_env("KESS_DEBUG", c.debug)?;
        }
    }
    Ok(())
}
