//! Startup and shutdown choreography of a sidecar process paired with an app.
//!
//! The sidecar is spawned first. Two tasks then run concurrently, each
//! reporting back on its own oneshot channel:
//!
//! - readiness: probes the sidecar's HTTP and gRPC ports, but only when the
//!   app declares a listen port. A sidecar configured with an app port waits
//!   for that app, and an app without one typically waits for the sidecar, so
//!   probing in the second case would stall startup.
//! - app launch: spawns the app with piped output and starts one drain task
//!   per stream.
//!
//! Once both have reported, metadata is registered, the run is `Running`, and
//! the orchestrator waits on the shutdown future. The shutdown future is also
//! raced against readiness and metadata registration, so a request during
//! startup is honored. Shutdown kills the sidecar, then the app, each exactly
//! once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{oneshot, watch};

use super::error::ProcessError;
use super::launch::{CommandSpec, LaunchPlan};
use super::metadata::{APP_COMMAND_KEY, CLI_PID_KEY, MetadataClient};
use super::probe::PortProbe;

/// Prefix marking lines forwarded from the app's stdout/stderr.
pub const APP_LOG_PREFIX: &str = "== APP ==";

/// Lifecycle of one standalone run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    SidecarStarting,
    SidecarHealthy,
    AppStarting,
    Running,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// No app port; the probe was not run.
    Skipped,
    Healthy,
    Unresponsive,
}

/// Something that can be killed once at shutdown.
#[async_trait]
pub trait KillTarget: Send {
    async fn kill(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl KillTarget for Child {
    async fn kill(&mut self) -> std::io::Result<()> {
        Child::kill(self).await
    }
}

/// Outcome of each kill at shutdown.
#[derive(Debug)]
pub struct ShutdownReport {
    pub sidecar: Result<(), ProcessError>,
    /// `None` when no app was launched.
    pub app: Option<Result<(), ProcessError>>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.sidecar.is_ok() && self.app.as_ref().is_none_or(Result::is_ok)
    }
}

/// Kill the sidecar, then the app. A failed kill does not skip the other.
pub async fn shutdown_pair(
    sidecar: &mut dyn KillTarget,
    app: Option<&mut dyn KillTarget>,
) -> ShutdownReport {
    let sidecar = match sidecar.kill().await {
        Ok(()) => {
            tracing::info!("Exited sidecar successfully");
            Ok(())
        }
        Err(source) => {
            tracing::error!("Error exiting sidecar: {}", source);
            Err(ProcessError::KillFailed {
                process: "sidecar",
                source,
            })
        }
    };

    let app = match app {
        None => None,
        Some(app) => Some(match app.kill().await {
            Ok(()) => {
                tracing::info!("Exited app successfully");
                Ok(())
            }
            Err(source) => {
                tracing::error!("Error exiting app: {}", source);
                Err(ProcessError::KillFailed {
                    process: "app",
                    source,
                })
            }
        }),
    };

    ShutdownReport { sidecar, app }
}

/// SIGINT and SIGTERM listeners, registered when installed.
///
/// Install before spawning anything so a signal that arrives during startup
/// is queued for `recv` instead of hitting the default handler.
pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    pub fn install() -> Result<Self, ProcessError> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let interrupt = signal(SignalKind::interrupt()).map_err(ProcessError::SignalHandler)?;
            let terminate = signal(SignalKind::terminate()).map_err(ProcessError::SignalHandler)?;
            Ok(Self {
                interrupt,
                terminate,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next SIGINT or SIGTERM.
    pub async fn recv(&mut self) {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => {}
                _ = self.terminate.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::info!("Terminate signal received, shutting down");
    }
}

/// Drives one run from spawn to shutdown.
pub struct Orchestrator {
    probe: Arc<dyn PortProbe>,
    metadata: Arc<dyn MetadataClient>,
    state: watch::Sender<RunState>,
}

impl Orchestrator {
    pub fn new(probe: Arc<dyn PortProbe>, metadata: Arc<dyn MetadataClient>) -> Self {
        let (state, _) = watch::channel(RunState::Starting);
        Self {
            probe,
            metadata,
            state,
        }
    }

    /// Follow state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    fn set_state(&self, state: RunState) {
        tracing::debug!("Run state: {:?}", state);
        self.state.send_replace(state);
    }

    /// Start the pair, wait for `shutdown`, then stop both.
    ///
    /// Spawn failures are fatal. Readiness timeouts and metadata failures
    /// are logged and the run proceeds. If `shutdown` resolves before the
    /// run is `Running`, whatever was spawned is killed and the report is
    /// returned without entering `Running`.
    pub async fn run<F>(
        &self,
        plan: LaunchPlan,
        shutdown: F,
    ) -> Result<ShutdownReport, ProcessError>
    where
        F: Future<Output = ()> + Send,
    {
        self.set_state(RunState::Starting);
        tracing::info!(
            "Starting sidecar with id {}. HTTP Port: {}. gRPC Port: {}",
            plan.app_id,
            plan.http_port,
            plan.grpc_port
        );

        self.set_state(RunState::SidecarStarting);
        let mut sidecar = plan
            .sidecar
            .command(false)
            .spawn()
            .map_err(|source| ProcessError::SpawnFailed {
                program: plan.sidecar.program.clone(),
                source,
            })?;

        let mut shutdown = std::pin::pin!(shutdown);

        let (ready_tx, ready_rx) = oneshot::channel();
        let probe = Arc::clone(&self.probe);
        let (http_port, grpc_port, timeout) = (plan.http_port, plan.grpc_port, plan.wait_timeout);
        let probe_ports = plan.app_port.is_some();
        let readiness = tokio::spawn(async move {
            let readiness = if probe_ports {
                wait_for_sidecar(probe.as_ref(), http_port, grpc_port, timeout).await
            } else {
                Readiness::Skipped
            };
            let _ = ready_tx.send(readiness);
        });

        let (app_tx, app_rx) = oneshot::channel();
        let app_spec = plan.app.clone();
        tokio::spawn(async move {
            let launched = match app_spec {
                Some(spec) => spawn_app(&spec).map(Some),
                None => Ok(None),
            };
            let _ = app_tx.send(launched);
        });

        // A shutdown request during startup skips straight to the kills.
        let mut interrupted = tokio::select! {
            ready = ready_rx => {
                if matches!(ready, Ok(Readiness::Healthy)) {
                    self.set_state(RunState::SidecarHealthy);
                }
                false
            }
            _ = shutdown.as_mut() => {
                readiness.abort();
                true
            }
        };

        self.set_state(RunState::AppStarting);
        let launched = app_rx.await.unwrap_or_else(|_| {
            Err(ProcessError::InvalidLaunch {
                reason: "app launch task ended without reporting".to_string(),
            })
        });
        let mut app = match launched {
            Ok(app) => app,
            Err(e) => {
                let _ = sidecar.kill().await;
                self.set_state(RunState::Terminated);
                return Err(e);
            }
        };

        if !interrupted {
            interrupted = tokio::select! {
                _ = self.register_metadata(&plan) => false,
                _ = shutdown.as_mut() => true,
            };
        }

        if interrupted {
            tracing::info!("Shutdown requested during startup");
        } else {
            self.set_state(RunState::Running);
            if app.is_some() {
                tracing::info!(
                    "You're up and running! Both sidecar and app logs will appear here."
                );
            } else {
                tracing::info!("You're up and running! Sidecar logs will appear here.");
            }
            shutdown.as_mut().await;
        }

        self.set_state(RunState::ShuttingDown);
        let report = shutdown_pair(
            &mut sidecar,
            app.as_mut().map(|child| child as &mut dyn KillTarget),
        )
        .await;

        self.set_state(RunState::Terminated);
        Ok(report)
    }

    async fn register_metadata(&self, plan: &LaunchPlan) {
        let pid = std::process::id().to_string();
        if let Err(e) = self.metadata.put(plan.http_port, CLI_PID_KEY, &pid).await {
            tracing::warn!("Could not update sidecar metadata for cliPID: {}", e);
        }

        if let Some(command) = plan.app_command_line() {
            tracing::info!("Updating metadata for app command: {}", command);
            if let Err(e) = self
                .metadata
                .put(plan.http_port, APP_COMMAND_KEY, &command)
                .await
            {
                tracing::warn!("Could not update sidecar metadata for appCommand: {}", e);
            }
        }
    }
}

async fn wait_for_sidecar(
    probe: &dyn PortProbe,
    http_port: u16,
    grpc_port: u16,
    timeout: Duration,
) -> Readiness {
    tracing::info!(
        "Checking if sidecar is listening on HTTP port {} and gRPC port {}",
        http_port,
        grpc_port
    );
    let (http, grpc) = tokio::join!(
        probe.wait_listening(http_port, timeout),
        probe.wait_listening(grpc_port, timeout)
    );

    let mut healthy = true;
    for result in [http, grpc] {
        if let Err(e) = result {
            tracing::warn!("Sidecar is not listening: {}", e);
            healthy = false;
        }
    }

    if healthy {
        tracing::info!("Sidecar is up and running");
        Readiness::Healthy
    } else {
        tracing::warn!("Sidecar might not be responding");
        Readiness::Unresponsive
    }
}

fn spawn_app(spec: &CommandSpec) -> Result<Child, ProcessError> {
    let mut child = spec
        .command(true)
        .spawn()
        .map_err(|source| ProcessError::SpawnFailed {
            program: spec.program.clone(),
            source,
        })?;

    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, "stdout");
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, "stderr");
    }

    tracing::info!("Started app: {}", spec.display());
    Ok(child)
}

/// Forward each line of `reader` to the log, prefixed as app output.
fn forward_lines<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::info!("{} {}", APP_LOG_PREFIX, line),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("App {} closed: {}", stream, e);
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubProcess;

    #[tokio::test]
    async fn test_shutdown_pair_kills_each_once() {
        let mut sidecar = StubProcess::new();
        let mut app = StubProcess::new();

        let report = shutdown_pair(&mut sidecar, Some(&mut app)).await;

        assert!(report.is_clean());
        assert_eq!(sidecar.kills(), 1);
        assert_eq!(app.kills(), 1);
    }

    #[tokio::test]
    async fn test_sidecar_kill_failure_still_kills_app() {
        let mut sidecar = StubProcess::failing();
        let mut app = StubProcess::new();

        let report = shutdown_pair(&mut sidecar, Some(&mut app)).await;

        assert!(matches!(
            report.sidecar,
            Err(ProcessError::KillFailed {
                process: "sidecar",
                ..
            })
        ));
        assert!(matches!(report.app, Some(Ok(()))));
        assert_eq!(app.kills(), 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_shutdown_without_app() {
        let mut sidecar = StubProcess::new();

        let report = shutdown_pair(&mut sidecar, None).await;

        assert!(report.is_clean());
        assert!(report.app.is_none());
    }

    #[tokio::test]
    async fn test_wait_for_sidecar_downgrades_timeout() {
        let probe = crate::testing::StubProbe::unresponsive();

        let readiness = wait_for_sidecar(&probe, 1, 2, Duration::from_millis(10)).await;

        assert_eq!(readiness, Readiness::Unresponsive);
        assert_eq!(probe.ports(), vec![1, 2]);
    }
}
