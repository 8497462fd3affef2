//! Error types for container engine calls.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Kind of engine resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Container,
    Network,
    Volume,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Container => write!(f, "container"),
            Self::Network => write!(f, "network"),
            Self::Volume => write!(f, "volume"),
        }
    }
}

/// Errors reported by a [`ContainerEngine`](super::ContainerEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The named resource does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What was looked up.
        kind: ResourceKind,
        /// Name or id used for the lookup.
        name: String,
    },

    /// A resource with that name already exists.
    #[error("{kind} '{name}' already exists")]
    Conflict {
        /// What was being created.
        kind: ResourceKind,
        /// Requested name.
        name: String,
    },

    /// The engine could not be reached.
    #[error("container engine not available: {reason}")]
    Unavailable {
        /// Reason why the engine is unavailable.
        reason: String,
    },

    /// Any other failure reported by the engine.
    #[error("{operation} failed: {reason}")]
    Api {
        /// Engine call that failed, e.g. "create network kess".
        operation: String,
        /// Engine-provided message.
        reason: String,
    },

    /// A port mapping could not be parsed.
    #[error("invalid port spec '{spec}': {reason}")]
    InvalidPortSpec {
        /// The offending spec.
        spec: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
