//! Error types for VIF pool operations.
//!
//! Two layers of errors exist: [`ProviderError`] is what the network control
//! plane collaborator reports, and [`PoolError`] is what the pool drivers
//! report to their callers. All errors implement `std::error::Error` via
//! `thiserror`.

use thiserror::Error;

/// Result type alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type alias for pool driver operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors reported by a [`VifProvider`](crate::VifProvider) or
/// [`TrunkProvider`](crate::TrunkProvider).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The referenced object no longer exists on the control plane.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Object kind (e.g. "port", "trunk", "subport").
        kind: String,
        /// Object identifier.
        id: String,
    },

    /// The control plane rejected or failed the request.
    #[error("Network client error during {operation}: {message}")]
    Client {
        /// The operation that failed (e.g. "update_port").
        operation: String,
        /// Error message.
        message: String,
    },

    /// The request conflicts with current control plane state.
    #[error("Conflict on {resource}: {message}")]
    Conflict {
        /// The conflicting resource.
        resource: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal provider error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl ProviderError {
    /// Creates a not found error.
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Creates a client error.
    pub fn client(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Client {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the object is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Client { .. } | ProviderError::Conflict { .. }
        )
    }
}

/// Errors returned by pool drivers.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The consumer has no host address yet.
    #[error("Consumer '{consumer}' has not been scheduled yet")]
    ConsumerNotScheduled {
        /// Consumer name.
        consumer: String,
    },

    /// The pool for the consumer's key has no available ports.
    #[error("No ports available for consumer '{consumer}'")]
    ResourceNotReady {
        /// Consumer name.
        consumer: String,
    },

    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Configuration file could not be read.
    #[error("Failed to read configuration file '{path}': {source}")]
    ConfigIo {
        /// File path.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The reclamation loop could not be started or joined.
    #[error("Reclamation loop error: {message}")]
    Reclaimer {
        /// Error message.
        message: String,
    },
}

impl PoolError {
    /// Creates a consumer not scheduled error.
    pub fn not_scheduled(consumer: impl Into<String>) -> Self {
        Self::ConsumerNotScheduled {
            consumer: consumer.into(),
        }
    }

    /// Creates a resource not ready error.
    pub fn not_ready(consumer: impl Into<String>) -> Self {
        Self::ResourceNotReady {
            consumer: consumer.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a reclamation loop error.
    pub fn reclaimer(message: impl Into<String>) -> Self {
        Self::Reclaimer {
            message: message.into(),
        }
    }

    /// Returns true if the caller should retry the request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            PoolError::ResourceNotReady { .. } => true,
            PoolError::Provider(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::not_found("port", "p-1");
        assert_eq!(err.to_string(), "port 'p-1' not found");

        let err = PoolError::not_ready("nginx-1");
        assert_eq!(err.to_string(), "No ports available for consumer 'nginx-1'");
    }

    #[test]
    fn test_client_error() {
        let err = ProviderError::client("update_port", "503 Service Unavailable");
        assert_eq!(
            err.to_string(),
            "Network client error during update_port: 503 Service Unavailable"
        );
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_provider_error_passthrough() {
        let err: PoolError = ProviderError::not_found("trunk", "t-1").into();
        assert_eq!(err.to_string(), "trunk 't-1' not found");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_is_retryable() {
        assert!(PoolError::not_ready("pod").is_retryable());
        assert!(PoolError::from(ProviderError::client("delete_port", "timeout")).is_retryable());
        assert!(!PoolError::not_scheduled("pod").is_retryable());
        assert!(!PoolError::invalid_config("ports_pool_batch", "must be > 0").is_retryable());
    }
}
