//! Error types for the db-operator

use thiserror::Error;

/// Errors that can occur while reconciling a resource
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Resource document could not be decoded or failed validation
    #[error("Malformed resource: {0}")]
    MalformedResource(String),

    /// A referenced attribute could not be turned into a concrete value
    #[error("Reference resolution failed: {0}")]
    ReferenceResolution(String),

    /// No handler registered for the server's dbType
    #[error("Unsupported server type: {0}")]
    UnsupportedServerType(String),

    /// Connection to the database server failed
    #[error("Connection to database server failed: {0}")]
    ConnectionFailed(String),

    /// Statement execution failed
    #[error("Statement failed: {0}")]
    QueryFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Stable label for logs and the error metric
    pub fn reason(&self) -> &'static str {
        match self {
            OperatorError::KubeError(_) => "KubeError",
            OperatorError::NotFound { .. } => "ResourceNotFound",
            OperatorError::MalformedResource(_) => "MalformedResource",
            OperatorError::ReferenceResolution(_) => "ReferenceResolutionError",
            OperatorError::UnsupportedServerType(_) => "UnsupportedServerType",
            OperatorError::ConnectionFailed(_) => "ConnectionFailed",
            OperatorError::QueryFailed(_) => "QueryFailed",
            OperatorError::SerializationError(_) => "SerializationError",
            OperatorError::Timeout(_) => "Timeout",
            OperatorError::Internal(_) => "Internal",
        }
    }
}
