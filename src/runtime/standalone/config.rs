//! Standalone backend configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::default_config_dir;

pub const DEFAULT_DAPRD_PATH: &str = "daprd";
pub const DEFAULT_PLACEMENT_HOST: &str = "localhost:50005";
pub const DEFAULT_REDIS_HOST: &str = "localhost:50003";
pub const DEFAULT_ZIPKIN_HOST: &str = "localhost:50004";
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Settings for running the sidecar and app as local processes.
///
/// Empty fields are unset; [`apply_defaults`](Self::apply_defaults) fills them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StandaloneRuntimeConfig {
    pub debug: bool,
    /// Sidecar binary, a bare name is looked up on `PATH`.
    pub daprd_path: String,
    /// Root of the generated manifests.
    pub config_dir: PathBuf,
    pub placement_host: String,
    pub redis_host: String,
    pub redis_password: String,
    pub zipkin_host: String,
    /// Bound on the sidecar readiness wait.
    pub wait_timeout_secs: u64,
    pub log_level: String,
}

impl StandaloneRuntimeConfig {
    pub fn apply_defaults(&mut self) {
        if self.daprd_path.is_empty() {
            self.daprd_path = DEFAULT_DAPRD_PATH.to_string();
        }
        if self.config_dir.as_os_str().is_empty() {
            self.config_dir = default_config_dir();
        }
        if self.placement_host.is_empty() {
            self.placement_host = DEFAULT_PLACEMENT_HOST.to_string();
        }
        if self.redis_host.is_empty() {
            self.redis_host = DEFAULT_REDIS_HOST.to_string();
        }
        if self.zipkin_host.is_empty() {
            self.zipkin_host = DEFAULT_ZIPKIN_HOST.to_string();
        }
        if self.wait_timeout_secs == 0 {
            self.wait_timeout_secs = DEFAULT_WAIT_TIMEOUT_SECS;
        }
        if self.log_level.is_empty() {
            self.log_level = DEFAULT_LOG_LEVEL.to_string();
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Resolve the sidecar binary, searching `PATH` for bare names.
    pub fn find_daprd(&self) -> Option<PathBuf> {
        let candidate = PathBuf::from(&self.daprd_path);
        if candidate.components().count() > 1 || candidate.is_absolute() {
            return candidate.is_file().then_some(candidate);
        }

        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(&self.daprd_path))
            .find(|p| p.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_defaults_fills_empty_fields() {
        let mut config = StandaloneRuntimeConfig::default();
        config.apply_defaults();

        assert_eq!(config.daprd_path, "daprd");
        assert_eq!(config.placement_host, "localhost:50005");
        assert_eq!(config.wait_timeout(), Duration::from_secs(60));
        assert!(config.config_dir.ends_with(".kess"));
    }

    #[test]
    fn test_apply_defaults_keeps_explicit_values() {
        let mut config = StandaloneRuntimeConfig {
            wait_timeout_secs: 5,
            log_level: "debug".to_string(),
            ..Default::default()
        };
        config.apply_defaults();

        assert_eq!(config.wait_timeout_secs, 5);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_find_daprd_missing_path() {
        let config = StandaloneRuntimeConfig {
            daprd_path: "/definitely/not/here/daprd".to_string(),
            ..Default::default()
        };
        assert!(config.find_daprd().is_none());
    }

    #[test]
    fn test_find_daprd_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("daprd");
        std::fs::write(&bin, b"").unwrap();

        let config = StandaloneRuntimeConfig {
            daprd_path: bin.to_string_lossy().to_string(),
            ..Default::default()
        };
        assert_eq!(config.find_daprd(), Some(bin));
    }
}
