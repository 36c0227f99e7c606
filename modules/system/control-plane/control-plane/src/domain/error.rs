//! Domain error types for the control plane.

use control_plane_sdk::ControlPlaneError;
use state_store::StateStoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Config for module '{0}' not set")]
    ConfigNotSet(String),

    #[error("Route not found: {action} {path}")]
    RouteNotFound { path: String, action: String },

    #[error("Module '{module}' at {address} is unresponsive: {reason}")]
    ModuleUnresponsive {
        module: String,
        address: String,
        reason: String,
    },

    #[error("Middleware '{middleware}' is owned by {owner}")]
    MiddlewareOwnership { middleware: String, owner: String },

    #[error("Database is not active")]
    DatabaseUnavailable,

    #[error("Database inactive after waiting {0:?}")]
    DatabaseWaitTimedOut(std::time::Duration),

    #[error("Failed to mount route {path}: {reason}")]
    RouteMount { path: String, reason: String },

    #[error("State store error: {0}")]
    StateStore(#[from] StateStoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<ControlPlaneError> for DomainError {
    fn from(e: ControlPlaneError) -> Self {
        match e {
            ControlPlaneError::InvalidArgument(m) => Self::InvalidArgument(m),
            ControlPlaneError::NotFound(m) => Self::ModuleNotFound(m),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<DomainError> for ControlPlaneError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::InvalidArgument(m) => Self::InvalidArgument(m),
            e @ (DomainError::ModuleNotFound(_)
            | DomainError::ConfigNotSet(_)
            | DomainError::RouteNotFound { .. }) => Self::NotFound(e.to_string()),
            e @ DomainError::MiddlewareOwnership { .. } => Self::PermissionDenied(e.to_string()),
            e @ DomainError::DatabaseWaitTimedOut(_) => Self::FailedPrecondition(e.to_string()),
            e @ (DomainError::ModuleUnresponsive { .. }
            | DomainError::DatabaseUnavailable
            | DomainError::RouteMount { .. }
            | DomainError::StateStore(_)
            | DomainError::Internal(_)) => Self::Internal(e.to_string()),
        }
    }
}
