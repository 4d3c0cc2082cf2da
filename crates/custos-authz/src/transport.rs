//! Query messages and the transport seam to remote authorities.
//!
//! The wire binding (SOAP over TLS in most deployments) lives outside this
//! crate. It plugs in through [`DecisionQueryTransport`], which sends a
//! structured [`QueryMessage`] and returns a structured [`ResponseMessage`].
//! [`QueryClient`] wraps a transport with the timeout and the response
//! checks every caller needs.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::assertion::Assertion;
use crate::config::QueryTemplate;
use crate::error::{TransportError, TransportResult};

/// A boxed future returned by transports.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A value qualified by a format identifier (subject name IDs, issuers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameId {
    /// The identifier value.
    pub value: String,
    /// The format of the value.
    pub format: String,
}

impl NameId {
    /// Create a new name identifier.
    pub fn new(value: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: format.into(),
        }
    }
}

/// An attribute requested in an attribute query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAttribute {
    /// Attribute name (the attribute ID).
    pub name: String,
    /// Attribute name format / data type.
    pub name_format: String,
}

/// What a query asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryBody {
    /// Ask an Attribute Authority for subject attributes.
    Attribute {
        /// Requested attributes.
        attributes: Vec<RequestedAttribute>,
    },
    /// Ask an authorization service for a decision.
    AuthzDecision {
        /// Resource being accessed.
        resource: String,
        /// Action being performed.
        action: String,
    },
}

/// A query sent to a remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMessage {
    /// Unique query identifier, echoed back as `in_response_to`.
    pub id: String,
    /// When the query was built.
    pub issue_instant: DateTime<Utc>,
    /// Identity of the querying party.
    pub issuer: NameId,
    /// Subject the query is about.
    pub subject: NameId,
    /// What is being asked.
    pub body: QueryBody,
}

impl QueryMessage {
    fn from_template(template: &QueryTemplate, subject: &str, body: QueryBody) -> Self {
        Self {
            id: format!("_{}", Uuid::now_v7()),
            issue_instant: Utc::now(),
            issuer: NameId::new(&template.issuer_name, &template.issuer_format),
            subject: NameId::new(subject, &template.subject_id_format),
            body,
        }
    }

    /// Build an attribute query for one attribute.
    pub fn attribute_query(
        template: &QueryTemplate,
        subject: &str,
        attribute_id: &str,
        attribute_format: &str,
    ) -> Self {
        Self::from_template(
            template,
            subject,
            QueryBody::Attribute {
                attributes: vec![RequestedAttribute {
                    name: attribute_id.to_string(),
                    name_format: attribute_format.to_string(),
                }],
            },
        )
    }

    /// Build an authorization decision query for a resource.
    pub fn authz_decision_query(template: &QueryTemplate, subject: &str, resource: &str) -> Self {
        Self::from_template(
            template,
            subject,
            QueryBody::AuthzDecision {
                resource: resource.to_string(),
                action: template.action.clone(),
            },
        )
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self.body {
            QueryBody::Attribute { .. } => "attribute",
            QueryBody::AuthzDecision { .. } => "authz_decision",
        }
    }
}

/// Top-level status of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The request succeeded.
    Success,
    /// The request could not be performed due to an error on the requester's
    /// side.
    Requester,
    /// The request could not be performed due to an error on the responder's
    /// side.
    Responder,
    /// Protocol version mismatch.
    VersionMismatch,
    /// Any other status code.
    Other(String),
}

impl ResponseStatus {
    /// Whether the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("Success"),
            Self::Requester => f.write_str("Requester"),
            Self::Responder => f.write_str("Responder"),
            Self::VersionMismatch => f.write_str("VersionMismatch"),
            Self::Other(code) => f.write_str(code),
        }
    }
}

/// A response from a remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Identifier of the query this answers.
    pub in_response_to: String,
    /// Response status.
    pub status: ResponseStatus,
    /// Returned assertions (possibly none).
    pub assertions: Vec<Assertion>,
}

impl ResponseMessage {
    /// Build a successful response to `query`.
    pub fn success(query: &QueryMessage, assertions: Vec<Assertion>) -> Self {
        Self {
            in_response_to: query.id.clone(),
            status: ResponseStatus::Success,
            assertions,
        }
    }
}

/// Sends queries to remote authorities.
///
/// Implementations own the wire binding and connection settings. The
/// `timeout` is advisory for the implementation; [`QueryClient`] enforces it
/// regardless.
pub trait DecisionQueryTransport: Send + Sync + fmt::Debug {
    /// Send `query` to `endpoint`.
    fn send<'a>(
        &'a self,
        query: &'a QueryMessage,
        endpoint: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, TransportResult<ResponseMessage>>;
}

/// A transport bound to a timeout, with response validation.
#[derive(Debug, Clone)]
pub struct QueryClient {
    transport: Arc<dyn DecisionQueryTransport>,
    timeout: Duration,
}

impl QueryClient {
    /// Create a client over `transport` with the given timeout.
    pub fn new(transport: Arc<dyn DecisionQueryTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// The enforced timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a query and validate the response.
    ///
    /// A timeout, a non-success status, or a response correlated to a
    /// different query are all transport errors.
    pub async fn send(
        &self,
        query: &QueryMessage,
        endpoint: &str,
    ) -> TransportResult<ResponseMessage> {
        let result = tokio::time::timeout(
            self.timeout,
            self.transport.send(query, endpoint, self.timeout),
        )
        .await;

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(endpoint, kind = query.kind(), error = %e, "query failed");
                crate::metrics::record_query(query.kind(), "error");
                return Err(e);
            }
            Err(_) => {
                warn!(endpoint, kind = query.kind(), timeout = ?self.timeout, "query timed out");
                crate::metrics::record_query(query.kind(), "timeout");
                return Err(TransportError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        if !response.status.is_success() {
            crate::metrics::record_query(query.kind(), "error");
            return Err(TransportError::Status {
                endpoint: endpoint.to_string(),
                status: response.status.to_string(),
            });
        }

        if response.in_response_to != query.id {
            crate::metrics::record_query(query.kind(), "error");
            return Err(TransportError::malformed(
                endpoint,
                format!(
                    "response correlates to {:?}, expected {:?}",
                    response.in_response_to, query.id
                ),
            ));
        }

        debug!(
            endpoint,
            kind = query.kind(),
            assertions = response.assertions.len(),
            "received response"
        );
        crate::metrics::record_query(query.kind(), "success");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{StubReply, StubTransport};

    fn template() -> QueryTemplate {
        QueryTemplate::default()
    }

    #[test]
    fn test_authz_decision_query() {
        let query = QueryMessage::authz_decision_query(&template(), "u1", "/secure");
        assert_eq!(query.subject.value, "u1");
        assert_eq!(query.kind(), "authz_decision");
        match &query.body {
            QueryBody::AuthzDecision { resource, action } => {
                assert_eq!(resource, "/secure");
                assert_eq!(action, &template().action);
            }
            QueryBody::Attribute { .. } => panic!("expected decision query"),
        }
    }

    #[test]
    fn test_query_ids_are_unique() {
        let a = QueryMessage::attribute_query(&template(), "u1", "urn:role", "string");
        let b = QueryMessage::attribute_query(&template(), "u1", "urn:role", "string");
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let stub = Arc::new(StubTransport::new(StubReply::Status(ResponseStatus::Responder)));
        let client = QueryClient::new(stub, Duration::from_secs(1));
        let query = QueryMessage::authz_decision_query(&template(), "u1", "/secure");

        let err = client.send(&query, "http://authz.example/").await.unwrap_err();
        assert!(matches!(err, TransportError::Status { .. }));
    }

    #[tokio::test]
    async fn test_uncorrelated_response_is_malformed() {
        let stub = Arc::new(StubTransport::new(StubReply::Uncorrelated));
        let client = QueryClient::new(stub, Duration::from_secs(1));
        let query = QueryMessage::authz_decision_query(&template(), "u1", "/secure");

        let err = client.send(&query, "http://authz.example/").await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_times_out() {
        let stub = Arc::new(StubTransport::new(StubReply::Hang));
        let client = QueryClient::new(stub, Duration::from_millis(50));
        let query = QueryMessage::authz_decision_query(&template(), "u1", "/secure");

        let err = client.send(&query, "http://authz.example/").await.unwrap_err();
        assert!(err.is_timeout());
    }
}
