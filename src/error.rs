//! Error types for the Ark operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Label selector that cannot be evaluated
    #[error("Invalid label selector: {0}")]
    InvalidSelector(#[from] kube::core::ParseExpressionError),

    /// Work queue key that is not `namespace/name`
    #[error("Invalid queue key '{0}': expected namespace/name")]
    InvalidKey(String),

    /// Object already exists in the API
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Object storage error
    #[error("Object storage error: {0}")]
    Storage(String),

    /// Block storage / snapshot error
    #[error("Block storage error: {0}")]
    BlockStorage(String),

    /// Volume created from a snapshot did not become ready in time
    #[error("timeout reached waiting for volume {volume_id} to be ready")]
    VolumeNotReady { volume_id: String },

    /// Plugin resolution error
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Backup or restore execution error
    #[error("Execution error: {0}")]
    Execution(String),

    /// Read caches never became ready
    #[error("timed out waiting for caches to sync: {0}")]
    CacheSync(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create an object storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a block storage error
    pub fn block_storage(msg: impl Into<String>) -> Self {
        Error::BlockStorage(msg.into())
    }

    /// Create a plugin error
    pub fn plugin(msg: impl Into<String>) -> Self {
        Error::Plugin(msg.into())
    }

    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Error::Execution(msg.into())
    }

    /// Whether the API rejected a create because the object already exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409 && resp.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// Whether the API reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}
