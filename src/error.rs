//! Central error types for the pod restarter
//!
//! Uses `thiserror` for ergonomic, type-safe error handling with
//! automatic `Display` and `Error` trait implementations.
//!
//! An unhealthy verdict is never an error here. Errors mean a verdict could
//! not be reached (infrastructure) or the process cannot start (configuration).

use thiserror::Error;

/// Central error type for the pod restarter
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error from kube-rs
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Startup configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Label selector text could not be parsed
    #[error("Invalid label selector: {0}")]
    InvalidSelector(String),

    /// An address-dependent check is configured but the pod has no IP yet
    #[error("Pod {namespace}/{name} has no assigned IP address")]
    MissingAddress { namespace: String, name: String },

    /// Exec check needs a container but the pod declares none
    #[error("Pod {namespace}/{name} declares no containers")]
    NoContainers { namespace: String, name: String },

    /// Exec check configured without an exec channel on the evaluator
    #[error("Exec channel not configured for exec checks")]
    ExecUnavailable,

    /// Exec stream could not be established or read
    #[error("Exec failed: {0}")]
    ExecError(String),

    /// Owner group lookup did not yield a usable selector
    #[error("Selector for group {group} in namespace {namespace} unavailable")]
    GroupSelectorUnavailable { namespace: String, group: String },

    /// HTTP client construction error (from reqwest)
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Result type alias for restarter operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Check if this error type should trigger a retry
    ///
    /// Configuration errors are fatal at startup and never retried.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Error::ConfigError(_) | Error::InvalidSelector(_))
    }

    /// Returns true when the API server answered 404 for the request
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Returns true when the API server rejected the request with 409, e.g. a failed precondition
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(resp)) if resp.code == 409)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "NotFound".to_string(),
            code,
        }))
    }

    #[test]
    fn test_not_found_detection() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(!Error::ExecUnavailable.is_not_found());
        assert!(api_error(409).is_conflict());
        assert!(!api_error(404).is_conflict());
    }

    #[test]
    fn test_retriable_classification() {
        assert!(api_error(500).is_retriable());
        assert!(Error::ExecUnavailable.is_retriable());
        assert!(Error::MissingAddress {
            namespace: "default".to_string(),
            name: "web-0".to_string(),
        }
        .is_retriable());
        assert!(!Error::ConfigError("bad".to_string()).is_retriable());
        assert!(!Error::InvalidSelector("=x".to_string()).is_retriable());
    }
}
