//! Error types shared across kess.

use thiserror::Error;

use crate::manifest::ManifestError;
use crate::runtime::standalone::ProcessError;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value was present but could not be used.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// The runtime tag does not name a known backend.
    #[error("Unknown runtime type: {name} (expected docker, standalone or slim)")]
    UnknownRuntime { name: String },

    /// The configuration file could not be parsed.
    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors surfaced by a [`Runtime`](crate::runtime::Runtime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The container engine could not be reached.
    #[error("Container engine not available: {reason}")]
    EngineUnavailable { reason: String },

    /// Failed to pull an image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed { image: String, reason: String },

    /// A container with the requested name already exists.
    #[error("Container '{name}' already exists; remove it before running it again")]
    ContainerExists { name: String },

    /// Failed to create a container.
    #[error("Failed to create container '{name}': {reason}")]
    ContainerCreationFailed { name: String, reason: String },

    /// Failed to start a container.
    #[error("Failed to start container '{name}': {reason}")]
    ContainerStartFailed { name: String, reason: String },

    /// Failed to remove a container.
    #[error("Failed to remove container '{name}': {reason}")]
    ContainerRemovalFailed { name: String, reason: String },

    /// Failed to create a network.
    #[error("Failed to create network '{name}': {reason}")]
    NetworkCreationFailed { name: String, reason: String },

    /// Failed to remove a network.
    #[error("Failed to remove network '{name}': {reason}")]
    NetworkRemovalFailed { name: String, reason: String },

    /// Failed to create a volume.
    #[error("Failed to create volume '{name}': {reason}")]
    VolumeCreationFailed { name: String, reason: String },

    /// Failed to remove a volume.
    #[error("Failed to remove volume '{name}': {reason}")]
    VolumeRemovalFailed { name: String, reason: String },

    /// Failed to copy an archive into a volume.
    #[error("Failed to copy files into volume '{volume}': {reason}")]
    CopyToVolumeFailed { volume: String, reason: String },

    /// Failed to list labeled resources.
    #[error("Failed to list {kind}: {reason}")]
    ListFailed { kind: String, reason: String },

    /// Failed to read container logs.
    #[error("Failed to read logs of '{name}': {reason}")]
    LogsFailed { name: String, reason: String },

    /// Options passed to an operation are unusable.
    #[error("Invalid options: {reason}")]
    InvalidOptions { reason: String },

    /// The backend does not implement this operation.
    #[error("'{operation}' is not supported by the {runtime} runtime")]
    Unsupported {
        runtime: &'static str,
        operation: &'static str,
    },

    /// Manifest rendering or writing failed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Local process orchestration failed.
    #[error(transparent)]
    Process(#[from] ProcessError),
}
