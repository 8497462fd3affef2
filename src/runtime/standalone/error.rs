//! Process orchestration errors.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    /// A run is already active on this runtime instance.
    #[error("App '{app_id}' is already running; stop it before starting another")]
    AlreadyRunning { app_id: String },

    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid launch options: {reason}")]
    InvalidLaunch { reason: String },

    #[error("Could not allocate a free local port: {0}")]
    NoFreePort(#[source] std::io::Error),

    #[error("Nothing listening on port {port} after {timeout:?}")]
    NotListening { port: u16, timeout: Duration },

    #[error("Metadata update '{key}' failed: {reason}")]
    Metadata { key: String, reason: String },

    #[error("Could not install signal handlers: {0}")]
    SignalHandler(#[source] std::io::Error),

    #[error("Failed to kill {process}: {source}")]
    KillFailed {
        process: &'static str,
        #[source]
        source: std::io::Error,
    },
}
