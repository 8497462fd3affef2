//! Sidecar and app command lines for a standalone run.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::config::StandaloneRuntimeConfig;
use super::error::ProcessError;
use crate::manifest::ManifestLayout;
use crate::runtime::RunOptions;

/// Env var carrying the sidecar's HTTP port into the app.
pub const HTTP_PORT_ENV: &str = "DAPR_HTTP_PORT";
/// Env var carrying the sidecar's gRPC port into the app.
pub const GRPC_PORT_ENV: &str = "DAPR_GRPC_PORT";

const DEFAULT_APP_PROTOCOL: &str = "http";

/// A program with its arguments, environment and working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command killed when its handle is dropped. Output is piped when
    /// `capture` is set, inherited otherwise.
    pub fn command(&self, capture: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Program and arguments joined with spaces.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything needed to start one sidecar/app pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub app_id: String,
    pub sidecar: CommandSpec,
    pub app: Option<CommandSpec>,
    pub http_port: u16,
    pub grpc_port: u16,
    /// Port the app listens on; readiness is only probed when set.
    pub app_port: Option<u16>,
    pub wait_timeout: Duration,
}

impl LaunchPlan {
    /// Resolve ports and build both command lines.
    ///
    /// Unset HTTP, gRPC and profiling ports are given free local ports.
    pub fn build(
        config: &StandaloneRuntimeConfig,
        options: &RunOptions,
    ) -> Result<Self, ProcessError> {
        if options.app_id.trim().is_empty() {
            return Err(ProcessError::InvalidLaunch {
                reason: "app id must not be empty".to_string(),
            });
        }

        let profile_port = options.enable_profiling.then_some(options.profile_port);
        let mut requested = vec![options.http_port, options.grpc_port];
        requested.extend(profile_port);
        let ports = resolve_ports(&requested)?;
        let (http_port, grpc_port) = (ports[0], ports[1]);

        let layout = ManifestLayout::default();
        let components = options
            .components_path
            .clone()
            .unwrap_or_else(|| layout.components_dir(&config.config_dir));
        let config_file = options
            .config_file
            .clone()
            .unwrap_or_else(|| layout.configuration_path(&config.config_dir));
        let placement = options
            .placement_host
            .clone()
            .unwrap_or_else(|| config.placement_host.clone());
        let log_level = options
            .log_level
            .clone()
            .unwrap_or_else(|| config.log_level.clone());
        let protocol = options
            .app_protocol
            .clone()
            .unwrap_or_else(|| DEFAULT_APP_PROTOCOL.to_string());

        let mut sidecar = CommandSpec::new(&config.daprd_path)
            .arg("--app-id")
            .arg(&options.app_id)
            .arg("--dapr-http-port")
            .arg(http_port.to_string())
            .arg("--dapr-grpc-port")
            .arg(grpc_port.to_string())
            .arg("--log-level")
            .arg(log_level)
            .arg("--placement-host-address")
            .arg(placement)
            .arg("--components-path")
            .arg(components.to_string_lossy())
            .arg("--config")
            .arg(config_file.to_string_lossy())
            .arg("--app-protocol")
            .arg(protocol);

        if let Some(port) = options.app_port {
            sidecar = sidecar.arg("--app-port").arg(port.to_string());
        }
        if let Some(n) = options.max_concurrency {
            sidecar = sidecar.arg("--app-max-concurrency").arg(n.to_string());
        }
        if let Some(port) = options.metrics_port {
            sidecar = sidecar.arg("--metrics-port").arg(port.to_string());
        }
        if let Some(&port) = ports.get(2) {
            sidecar = sidecar
                .arg("--enable-profiling")
                .arg("--profile-port")
                .arg(port.to_string());
        }
        if options.app_ssl {
            sidecar = sidecar.arg("--app-ssl");
        }

        let app = match options.command.split_first() {
            Some((program, args)) => Some(CommandSpec {
                program: program.clone(),
                args: args.to_vec(),
                env: vec![
                    (HTTP_PORT_ENV.to_string(), http_port.to_string()),
                    (GRPC_PORT_ENV.to_string(), grpc_port.to_string()),
                ],
                cwd: options.working_dir.clone(),
            }),
            None => None,
        };

        Ok(Self {
            app_id: options.app_id.clone(),
            sidecar,
            app,
            http_port,
            grpc_port,
            app_port: options.app_port,
            wait_timeout: options.wait_timeout.unwrap_or_else(|| config.wait_timeout()),
        })
    }

    /// The app's literal command line, as registered with the sidecar.
    pub fn app_command_line(&self) -> Option<String> {
        self.app.as_ref().map(CommandSpec::display)
    }
}

/// Fill every unset or zero port with a distinct free local port.
fn resolve_ports(requested: &[Option<u16>]) -> Result<Vec<u16>, ProcessError> {
    let missing = requested
        .iter()
        .filter(|p| !matches!(p, Some(p) if *p > 0))
        .count();
    let mut free = free_ports(missing)?.into_iter();

    requested
        .iter()
        .map(|port| match port {
            Some(p) if *p > 0 => Ok(*p),
            _ => free.next().ok_or_else(|| {
                ProcessError::NoFreePort(std::io::Error::other("port allocation came up short"))
            }),
        })
        .collect()
}

/// Ask the OS for `count` distinct unused local ports.
///
/// All listeners stay bound until every port is read, so no port is handed
/// out twice.
pub fn free_ports(count: usize) -> Result<Vec<u16>, ProcessError> {
    let listeners = (0..count)
        .map(|_| std::net::TcpListener::bind("127.0.0.1:0").map_err(ProcessError::NoFreePort))
        .collect::<Result<Vec<_>, _>>()?;

    listeners
        .iter()
        .map(|listener| {
            listener
                .local_addr()
                .map(|addr| addr.port())
                .map_err(ProcessError::NoFreePort)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> StandaloneRuntimeConfig {
        let mut config = StandaloneRuntimeConfig {
            config_dir: PathBuf::from("/home/dev/.kess"),
            ..Default::default()
        };
        config.apply_defaults();
        config
    }

    fn options() -> RunOptions {
        RunOptions {
            app_id: "orders".to_string(),
            http_port: Some(3500),
            grpc_port: Some(50001),
            ..Default::default()
        }
    }

    #[test]
    fn test_sidecar_command_line() {
        let plan = LaunchPlan::build(&config(), &options()).unwrap();

        assert_eq!(plan.sidecar.program, "daprd");
        assert_eq!(
            plan.sidecar.args,
            vec![
                "--app-id",
                "orders",
                "--dapr-http-port",
                "3500",
                "--dapr-grpc-port",
                "50001",
                "--log-level",
                "info",
                "--placement-host-address",
                "localhost:50005",
                "--components-path",
                "/home/dev/.kess/components",
                "--config",
                "/home/dev/.kess/config.yaml",
                "--app-protocol",
                "http",
            ]
        );
        assert!(plan.app.is_none());
        assert_eq!(plan.app_port, None);
    }

    #[test]
    fn test_optional_flags() {
        let opts = RunOptions {
            app_port: Some(8080),
            max_concurrency: Some(4),
            metrics_port: Some(9090),
            enable_profiling: true,
            profile_port: Some(7777),
            app_ssl: true,
            ..options()
        };
        let plan = LaunchPlan::build(&config(), &opts).unwrap();
        let args = plan.sidecar.args.join(" ");

        assert!(args.contains("--app-port 8080"));
        assert!(args.contains("--app-max-concurrency 4"));
        assert!(args.contains("--metrics-port 9090"));
        assert!(args.contains("--enable-profiling --profile-port 7777"));
        assert!(args.ends_with("--app-ssl"));
        assert_eq!(plan.app_port, Some(8080));
    }

    #[test]
    fn test_free_ports_are_allocated() {
        let opts = RunOptions {
            app_id: "orders".to_string(),
            ..Default::default()
        };
        let plan = LaunchPlan::build(&config(), &opts).unwrap();
        assert!(plan.http_port > 0);
        assert!(plan.grpc_port > 0);
        assert_ne!(plan.http_port, plan.grpc_port);
    }

    #[test]
    fn test_free_ports_are_distinct() {
        let ports = free_ports(32).unwrap();
        let unique: std::collections::HashSet<u16> = ports.iter().copied().collect();
        assert_eq!(ports.len(), 32);
        assert_eq!(unique.len(), 32);
    }

    #[test]
    fn test_profile_port_distinct_from_sidecar_ports() {
        let opts = RunOptions {
            app_id: "orders".to_string(),
            enable_profiling: true,
            ..Default::default()
        };
        let plan = LaunchPlan::build(&config(), &opts).unwrap();

        let args = &plan.sidecar.args;
        let pos = args.iter().position(|a| a == "--profile-port").unwrap();
        let profile: u16 = args[pos + 1].parse().unwrap();
        assert_ne!(profile, plan.http_port);
        assert_ne!(profile, plan.grpc_port);
        assert_ne!(plan.http_port, plan.grpc_port);
    }

    #[test]
    fn test_explicit_ports_are_kept() {
        let ports = resolve_ports(&[Some(3500), None, Some(0)]).unwrap();
        assert_eq!(ports[0], 3500);
        assert!(ports[1] > 0 && ports[2] > 0);
        assert_ne!(ports[1], ports[2]);
    }

    #[test]
    fn test_app_command_gets_port_env() {
        let opts = RunOptions {
            command: vec!["python3".to_string(), "app.py".to_string()],
            working_dir: Some(PathBuf::from("/srv/app")),
            ..options()
        };
        let plan = LaunchPlan::build(&config(), &opts).unwrap();
        let app = plan.app.as_ref().unwrap();

        assert_eq!(app.program, "python3");
        assert_eq!(app.args, vec!["app.py"]);
        assert!(app.env.contains(&("DAPR_HTTP_PORT".to_string(), "3500".to_string())));
        assert!(app.env.contains(&("DAPR_GRPC_PORT".to_string(), "50001".to_string())));
        assert_eq!(app.cwd.as_deref(), Some(std::path::Path::new("/srv/app")));
        assert_eq!(plan.app_command_line().as_deref(), Some("python3 app.py"));
    }

    #[test]
    fn test_wait_timeout_override() {
        let opts = RunOptions {
            wait_timeout: Some(Duration::from_secs(3)),
            ..options()
        };
        let plan = LaunchPlan::build(&config(), &opts).unwrap();
        assert_eq!(plan.wait_timeout, Duration::from_secs(3));

        let plan = LaunchPlan::build(&config(), &options()).unwrap();
        assert_eq!(plan.wait_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_empty_app_id_rejected() {
        let opts = RunOptions::default();
        let err = LaunchPlan::build(&config(), &opts).unwrap_err();
        assert!(matches!(err, ProcessError::InvalidLaunch { .. }));
    }
}
