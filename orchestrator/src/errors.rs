//! Error types for the deployment orchestrator

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A referenced entity (task, run, node, resource, template) is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// A run is already in flight, or a live run was targeted for deletion
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Credential resolution or remote authentication failed
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Connection to a node failed or timed out
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Version-control fetch failed
    #[error("Sync error: {0}")]
    SyncError(String),

    /// A remote command exited non-zero
    #[error("Command `{command}` exited with code {code}")]
    CommandError { command: String, code: i32 },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Stable machine-readable code for the error class
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::IoError(_) => "io",
            DeployError::JsonError(_) => "json",
            DeployError::NotFound(_) => "not_found",
            DeployError::Conflict(_) => "conflict",
            DeployError::AuthError(_) => "auth",
            DeployError::TransportError(_) => "transport",
            DeployError::SyncError(_) => "sync",
            DeployError::CommandError { .. } => "command",
            DeployError::Cancelled(_) => "cancelled",
            DeployError::ValidationError(_) => "validation",
            DeployError::ConfigError(_) => "config",
            DeployError::ServerError(_) => "server",
            DeployError::ShutdownError(_) => "shutdown",
            DeployError::Internal(_) => "internal",
        }
    }

    /// Timeouts are transport failures with a recognizable message
    pub fn timeout(what: impl std::fmt::Display, after: std::time::Duration) -> Self {
        let after = if after.as_secs() == 0 {
            format!("{}ms", after.as_millis())
        } else {
            format!("{}s", after.as_secs())
        };
        DeployError::TransportError(format!("{} timed out after {}", what, after))
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}
