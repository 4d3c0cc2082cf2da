//! Error types for the authorization crate.

use std::time::Duration;
use thiserror::Error;

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Result type for query transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur while resolving attributes or enforcing decisions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// No Attribute Authority is configured for the requested attribute.
    ///
    /// This is not a fault: callers treat it as "cannot answer".
    #[error("no attribute authority mapped for attribute {attribute_id}")]
    NoMappingFound {
        /// The attribute that has no mapping.
        attribute_id: String,
    },

    /// The remote query failed.
    #[error("query transport error: {0}")]
    Transport(#[from] TransportError),

    /// Missing or invalid static configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cache storage fault.
    #[error("cache error: {0}")]
    Cache(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthzError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    /// Create a no-mapping error for an attribute.
    pub fn no_mapping(attribute_id: impl Into<String>) -> Self {
        Self::NoMappingFound {
            attribute_id: attribute_id.into(),
        }
    }

    /// Check if this error only signals that the attribute is unknown.
    pub const fn is_no_mapping(&self) -> bool {
        matches!(self, Self::NoMappingFound { .. })
    }

    /// Check if this is a retryable error.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Check if this error is a fault of the authorization infrastructure
    /// itself rather than a statement about the subject.
    pub const fn is_infrastructure_fault(&self) -> bool {
        !self.is_no_mapping()
    }
}

/// Errors raised by a [`DecisionQueryTransport`](crate::transport::DecisionQueryTransport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The query did not complete within the configured timeout.
    #[error("query to {endpoint} timed out after {timeout:?}")]
    Timeout {
        /// Endpoint that was queried.
        endpoint: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The endpoint could not be reached.
    #[error("failed to reach {endpoint}: {message}")]
    Connection {
        /// Endpoint that was queried.
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// The service answered with a non-success status.
    #[error("{endpoint} returned status {status}")]
    Status {
        /// Endpoint that was queried.
        endpoint: String,
        /// Status reported by the service.
        status: String,
    },

    /// The response could not be interpreted.
    #[error("malformed response from {endpoint}: {message}")]
    Malformed {
        /// Endpoint that was queried.
        endpoint: String,
        /// Error message.
        message: String,
    },
}

impl TransportError {
    /// Create a connection error.
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a malformed-response error.
    pub fn malformed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Check if this is a timeout.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if retrying the query could succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_mapping_error() {
        let err = AuthzError::no_mapping("urn:role");
        assert!(err.is_no_mapping());
        assert!(!err.is_infrastructure_fault());
        assert!(err.to_string().contains("urn:role"));
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: AuthzError = TransportError::Timeout {
            endpoint: "http://aa.example/".to_string(),
            timeout: Duration::from_secs(5),
        }
        .into();
        assert!(err.is_retryable());
        assert!(err.is_infrastructure_fault());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_retryable_error() {
        let status = TransportError::Status {
            endpoint: "http://aa.example/".to_string(),
            status: "Responder".to_string(),
        };
        assert!(!status.is_retryable());
        assert!(TransportError::connection("http://aa.example/", "refused").is_retryable());

        let config_err = AuthzError::config("empty mapping");
        assert!(!config_err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = AuthzError::config("empty mapping table");
        assert_eq!(err.to_string(), "configuration error: empty mapping table");
    }
}
