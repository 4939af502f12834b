//! Error types surfaced by the client services.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Reason used when an operation fails with an error that renders as an empty string.
pub const UNEXPECTED_FAILURE_REASON: &str = "Unexpected Kafka operation failure";

/// Failure detail for a bounded service operation.
///
/// Exactly two kinds exist: the operation ran out of time, or it failed for
/// any other reason. Both carry the name of the operation that failed.
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("{operation} failed: {reason}")]
    OperationFailed {
        operation: String,
        reason: String,
        #[source]
        cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl ServiceError {
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        ServiceError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// An operational failure without an underlying cause.
    pub fn failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        ServiceError::OperationFailed {
            operation: operation.into(),
            reason: reason.into(),
            cause: None,
        }
    }

    /// An operational failure caused by `cause`, whose message becomes the reason.
    pub fn from_cause<E>(operation: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let reason = cause.to_string();
        let reason = if reason.trim().is_empty() {
            UNEXPECTED_FAILURE_REASON.to_string()
        } else {
            reason
        };
        ServiceError::OperationFailed {
            operation: operation.into(),
            reason,
            cause: Some(Arc::new(cause)),
        }
    }

    /// Name of the operation that failed.
    pub fn operation(&self) -> &str {
        match self {
            ServiceError::Timeout { operation, .. } => operation,
            ServiceError::OperationFailed { operation, .. } => operation,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ServiceError::Timeout { .. })
    }
}

/// Outcome of every bounded service call.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
