//! Command-line surface.
//!
//! `kess <backend> <operation>`: picks a backend, resolves its configuration,
//! maps flags to option structs, and calls the [`Runtime`] contract.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ColorChoice, Parser, Subcommand};

use crate::config;
use crate::runtime::{
    self, DashboardOptions, LogsOptions, RemoveOptions, RunOptions, Runtime, RuntimeKind,
};

#[derive(Parser, Debug)]
#[command(name = "kess")]
#[command(about = "Local environment orchestrator for sidecar-based microservices")]
#[command(
    long_about = "kess brings up the shared platform services (state store, tracer, placement, ingress) and runs apps next to their sidecars.\nExamples:\n  kess docker install\n  kess docker run --app-id orders --image orders:dev --app-port 8080\n  kess standalone run --app-id orders --app-port 3000 -- node app.js"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output, including image pull progress and full error chains
    #[arg(long, global = true)]
    pub debug: bool,

    /// kess configuration file (defaults to ~/.kess/kess.toml when present)
    #[arg(long = "kess-config", global = true, env = "KESS_CONFIG")]
    pub kess_config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Platform and apps as Docker containers
    #[command(subcommand)]
    Docker(Operation),

    /// Sidecar and app as local processes
    #[command(subcommand, alias = "process")]
    Standalone(Operation),

    /// Accept every operation and do nothing
    #[command(subcommand, alias = "noop")]
    Slim(Operation),
}

impl Command {
    pub fn kind(&self) -> RuntimeKind {
        match self {
            Self::Docker(_) => RuntimeKind::Docker,
            Self::Standalone(_) => RuntimeKind::Standalone,
            Self::Slim(_) => RuntimeKind::Slim,
        }
    }

    pub fn operation(&self) -> &Operation {
        match self {
            Self::Docker(op) | Self::Standalone(op) | Self::Slim(op) => op,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Operation {
    /// Bring up the shared platform services
    #[command(
        about = "Install the platform",
        long_about = "Writes the component manifests and starts the state store, tracer, placement and ingress.\nExample: kess docker install"
    )]
    Install,

    /// Remove every platform resource and app
    #[command(
        about = "Uninstall the platform",
        long_about = "Removes every container, volume and network carrying the kess label.\nExample: kess docker uninstall"
    )]
    Uninstall,

    /// Run an app with its sidecar
    Run(RunArgs),

    /// Stop and remove an app and its sidecar
    Remove {
        /// The id of the app to remove
        #[arg(long = "app-id", short = 'a')]
        app_id: String,
    },

    /// Print an app's logs
    Logs {
        /// The id of the app
        #[arg(long = "app-id", short = 'a')]
        app_id: String,

        /// Keep streaming new output
        #[arg(long, short = 'f')]
        follow: bool,

        /// Number of trailing lines to show
        #[arg(long)]
        tail: Option<String>,

        /// Show the sidecar's output instead of the app's
        #[arg(long)]
        sidecar: bool,
    },

    /// Start the dashboard
    #[command(alias = "web")]
    Dashboard {
        /// Host port for the dashboard
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// The id of the app
    #[arg(long = "app-id", short = 'a')]
    pub app_id: String,

    /// The port the app listens on
    #[arg(long = "app-port", short = 'p')]
    pub app_port: Option<u16>,

    /// App image (docker backend)
    #[arg(long)]
    pub image: Option<String>,

    /// Sidecar configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// HTTP port for the sidecar
    #[arg(long = "dapr-http-port", short = 'H')]
    pub http_port: Option<u16>,

    /// gRPC port for the sidecar
    #[arg(long = "dapr-grpc-port", short = 'G')]
    pub grpc_port: Option<u16>,

    /// Enable pprof profiling via an HTTP endpoint
    #[arg(long = "enable-profiling")]
    pub enable_profiling: bool,

    /// Port for the profile server
    #[arg(long = "profile-port")]
    pub profile_port: Option<u16>,

    /// Sidecar log verbosity: debug, info, warn, error
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Concurrency level of the app
    #[arg(long = "app-max-concurrency")]
    pub max_concurrency: Option<u32>,

    /// Protocol the app speaks: http or grpc
    #[arg(long = "app-protocol", short = 'P')]
    pub app_protocol: Option<String>,

    /// Directory holding the component manifests
    #[arg(long = "components-path", short = 'd')]
    pub components_path: Option<PathBuf>,

    /// Address of the placement service
    #[arg(long = "placement-host-address")]
    pub placement_host: Option<String>,

    /// Talk to the app over TLS
    #[arg(long = "app-ssl")]
    pub app_ssl: bool,

    /// Port the sidecar serves metrics on
    #[arg(long = "metrics-port", short = 'M')]
    pub metrics_port: Option<u16>,

    /// Working directory of the app
    #[arg(long)]
    pub pwd: Option<PathBuf>,

    /// Seconds to wait for the sidecar to listen
    #[arg(long = "wait-timeout")]
    pub wait_timeout: Option<u64>,

    /// App command and its arguments
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl From<RunArgs> for RunOptions {
    fn from(args: RunArgs) -> Self {
        Self {
            app_id: args.app_id,
            image: args.image,
            command: args.command,
            app_port: args.app_port,
            http_port: args.http_port,
            grpc_port: args.grpc_port,
            app_protocol: args.app_protocol,
            max_concurrency: args.max_concurrency,
            metrics_port: args.metrics_port,
            enable_profiling: args.enable_profiling,
            profile_port: args.profile_port,
            app_ssl: args.app_ssl,
            log_level: args.log_level,
            components_path: args.components_path,
            config_file: args.config,
            placement_host: args.placement_host,
            working_dir: args.pwd,
            wait_timeout: args.wait_timeout.map(Duration::from_secs),
        }
    }
}

/// Dispatch one operation to a constructed backend.
pub async fn run_operation(runtime: &dyn Runtime, operation: Operation) -> anyhow::Result<()> {
    match operation {
        Operation::Install => runtime.install().await?,
        Operation::Uninstall => runtime.uninstall().await?,
        Operation::Run(args) => runtime.run(args.into()).await?,
        Operation::Remove { app_id } => runtime.remove(RemoveOptions { app_id }).await?,
        Operation::Logs {
            app_id,
            follow,
            tail,
            sidecar,
        } => {
            runtime
                .logs(LogsOptions {
                    app_id,
                    follow,
                    tail,
                    sidecar,
                })
                .await?
        }
        Operation::Dashboard { port } => runtime.dashboard(DashboardOptions { port }).await?,
    }
    Ok(())
}

/// Resolve configuration, build the backend and run the command.
pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let kind = cli.command.kind();
    let config = config::resolve(Some(kind), cli.kess_config.as_deref(), cli.debug)?;
    let runtime = runtime::create(config).await?;

    let operation = cli.command.operation().clone();
    tracing::debug!("Running {:?} on the {} runtime", operation, runtime.name());
    run_operation(runtime.as_ref(), operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{SlimRuntime, SlimRuntimeConfig};
    use clap::CommandFactory;

    #[test]
    fn test_version() {
        let cmd = Cli::command();
        assert_eq!(
            cmd.get_version().unwrap_or("unknown"),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_docker_install() {
        let cli = Cli::try_parse_from(["kess", "docker", "install"]).unwrap();
        assert_eq!(cli.command.kind(), RuntimeKind::Docker);
        assert!(matches!(cli.command.operation(), Operation::Install));
        assert!(!cli.debug);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "kess",
            "slim",
            "uninstall",
            "--debug",
            "--kess-config",
            "/tmp/kess.toml",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.kess_config, Some(PathBuf::from("/tmp/kess.toml")));
    }

    #[test]
    fn test_parse_run_with_trailing_command() {
        let cli = Cli::try_parse_from([
            "kess",
            "standalone",
            "run",
            "--app-id",
            "orders",
            "--app-port",
            "3000",
            "--wait-timeout",
            "5",
            "--",
            "node",
            "app.js",
        ])
        .unwrap();

        let Operation::Run(args) = cli.command.operation().clone() else {
            panic!("expected run");
        };
        let options: RunOptions = args.into();
        assert_eq!(options.app_id, "orders");
        assert_eq!(options.app_port, Some(3000));
        assert_eq!(options.command, vec!["node", "app.js"]);
        assert_eq!(options.wait_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_run_config_flag_is_sidecar_config() {
        let cli = Cli::try_parse_from([
            "kess", "docker", "run", "-a", "orders", "--config", "tracing.yaml",
        ])
        .unwrap();
        let Operation::Run(args) = cli.command.operation().clone() else {
            panic!("expected run");
        };
        assert_eq!(
            RunOptions::from(args).config_file,
            Some(PathBuf::from("tracing.yaml"))
        );
        assert_eq!(cli.kess_config, None);
    }

    #[test]
    fn test_parse_logs_and_dashboard_alias() {
        let cli =
            Cli::try_parse_from(["kess", "docker", "logs", "-a", "orders", "-f", "--tail", "20"])
                .unwrap();
        assert!(matches!(
            cli.command.operation(),
            Operation::Logs { follow: true, tail: Some(t), .. } if t == "20"
        ));

        let cli = Cli::try_parse_from(["kess", "docker", "web", "-p", "9999"]).unwrap();
        assert!(matches!(
            cli.command.operation(),
            Operation::Dashboard { port: Some(9999) }
        ));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Cli::try_parse_from(["kess", "kubernetes", "install"]).is_err());
    }

    #[tokio::test]
    async fn test_run_operation_on_slim() {
        let runtime = SlimRuntime::new(SlimRuntimeConfig::default());
        run_operation(&runtime, Operation::Install).await.unwrap();
        run_operation(
            &runtime,
            Operation::Remove {
                app_id: "orders".to_string(),
            },
        )
        .await
        .unwrap();
    }
}
