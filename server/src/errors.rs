//! Error types for the WebDeploy server

use thiserror::Error;

/// Main error type for the WebDeploy server
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Input error: {0}")]
    InputError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Provisioning error: {0}")]
    ProvisionError(String),

    #[error("Provisioning conflict on '{resource}': {reason}")]
    ProvisionConflict { resource: String, reason: String },

    #[error("Upload error: {0}")]
    UploadError(String),

    #[error("Notification error: {0}")]
    NotifyError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Whether this error is a provisioning conflict that must be surfaced
    /// with the offending resource rather than retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DeployError::ProvisionConflict { .. })
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}
