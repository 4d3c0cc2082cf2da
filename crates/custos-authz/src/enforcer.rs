//! Policy enforcement (PEP).
//!
//! Each call to [`PolicyEnforcer::authorize`] runs one pass of the
//! enforcement state machine:
//!
//! ```text
//!                    ┌─> FilteredOut      (Allow, no network)
//! Start ─> filter ───┤
//!                    ├─> CachedDecision   (interpret cached assertions)
//!                    └─> Querying ──┬──> Decided      (interpret response)
//!                                   └──> QueryFailed  (Error)
//! ```
//!
//! Interpretation is safe by default. The first `Deny` or `Indeterminate`
//! statement rejects the request; a response with no decision statements,
//! or with anything other than `Permit`, is an error. Only a response in
//! which every statement is `Permit` allows access.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, info, instrument, warn};

use crate::assertion::{Assertion, Decision};
use crate::cache::DecisionCache;
use crate::config::{EnforcerConfig, QueryTemplate};
use crate::error::TransportError;
use crate::filter::LocalPolicyFilter;
use crate::metrics;
use crate::transport::{DecisionQueryTransport, QueryClient, QueryMessage, ResponseMessage};

/// Label of the decision cache in logs and metrics.
pub const DECISION_CACHE: &str = "decision";

/// Result of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnforcementOutcome {
    /// Forward the request.
    Allow,
    /// Authenticated subject denied access.
    Deny,
    /// Anonymous subject denied access.
    Unauthorized,
    /// The authorization infrastructure failed; access is refused.
    Error,
}

impl EnforcementOutcome {
    /// Whether the request may proceed.
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Status to reject the request with, or `None` to let it through.
    pub const fn status_code(self) -> Option<StatusCode> {
        match self {
            Self::Allow => None,
            Self::Deny => Some(StatusCode::FORBIDDEN),
            Self::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            Self::Error => Some(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Unauthorized => "unauthorized",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EnforcementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state reached by an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnforcementState {
    /// The local filter exempted the resource.
    FilteredOut,
    /// Decided from cached assertions.
    CachedDecision,
    /// Decided from a fresh query response.
    Decided,
    /// The query failed.
    QueryFailed,
}

impl EnforcementState {
    /// Label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FilteredOut => "filtered_out",
            Self::CachedDecision => "cached_decision",
            Self::Decided => "decided",
            Self::QueryFailed => "query_failed",
        }
    }
}

/// The query sent for a check, and what came back.
#[derive(Debug, Clone)]
pub struct QueryExchange {
    /// Endpoint the query was sent to.
    pub endpoint: String,
    /// The query.
    pub query: QueryMessage,
    /// The validated response, if the query succeeded.
    pub response: Option<ResponseMessage>,
}

/// Full result of [`PolicyEnforcer::authorize`].
#[derive(Debug, Clone)]
pub struct Enforcement {
    /// What to do with the request.
    pub outcome: EnforcementOutcome,
    /// How the outcome was reached.
    pub state: EnforcementState,
    /// Query and response, when a query was sent.
    pub exchange: Option<QueryExchange>,
    /// Why the query failed, for [`EnforcementState::QueryFailed`].
    pub error: Option<TransportError>,
}

impl Enforcement {
    fn new(outcome: EnforcementOutcome, state: EnforcementState) -> Self {
        Self {
            outcome,
            state,
            exchange: None,
            error: None,
        }
    }

    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        self.outcome.is_allowed()
    }
}

/// Interpret the decision statements of `assertions` for `subject`.
///
/// An empty subject is anonymous, so a rejection becomes
/// [`EnforcementOutcome::Unauthorized`] rather than
/// [`EnforcementOutcome::Deny`].
pub fn decide(subject: &str, assertions: &[Assertion]) -> EnforcementOutcome {
    let mut seen = false;
    let mut all_permit = true;

    for statement in assertions.iter().flat_map(Assertion::decisions) {
        seen = true;
        if statement.decision.is_failure() {
            debug!(
                resource = %statement.resource,
                decision = %statement.decision,
                "failing decision statement"
            );
            return if subject.is_empty() {
                EnforcementOutcome::Unauthorized
            } else {
                EnforcementOutcome::Deny
            };
        }
        if statement.decision != Decision::Permit {
            all_permit = false;
        }
    }

    if seen && all_permit {
        EnforcementOutcome::Allow
    } else {
        EnforcementOutcome::Error
    }
}

/// Policy Enforcement Point backed by a remote authorization service.
#[derive(Debug)]
pub struct PolicyEnforcer {
    filter: LocalPolicyFilter,
    client: QueryClient,
    cache: Arc<DecisionCache>,
    endpoint: String,
    cache_denies: bool,
    query: QueryTemplate,
}

impl PolicyEnforcer {
    /// Create an enforcer with an in-memory decision cache.
    pub fn new(
        config: EnforcerConfig,
        filter: LocalPolicyFilter,
        transport: Arc<dyn DecisionQueryTransport>,
    ) -> Self {
        let cache = Arc::new(DecisionCache::new(DECISION_CACHE, config.cache.clone()));
        Self::with_cache(config, filter, transport, cache)
    }

    /// Create an enforcer using an existing decision cache.
    pub fn with_cache(
        config: EnforcerConfig,
        filter: LocalPolicyFilter,
        transport: Arc<dyn DecisionQueryTransport>,
        cache: Arc<DecisionCache>,
    ) -> Self {
        Self {
            filter,
            client: QueryClient::new(transport, config.timeout),
            cache,
            endpoint: config.authz_service_uri,
            cache_denies: config.cache_denies,
            query: config.query,
        }
    }

    /// The local filter.
    pub fn filter(&self) -> &LocalPolicyFilter {
        &self.filter
    }

    /// The decision cache.
    pub fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }

    /// Endpoint of the authorization service.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Decide whether `subject` may access `resource`.
    ///
    /// Never fails: every error becomes a rejecting outcome.
    #[instrument(skip(self), fields(outcome = tracing::field::Empty))]
    pub async fn authorize(&self, subject: &str, resource: &str) -> Enforcement {
        let enforcement = self.run(subject, resource).await;

        tracing::Span::current().record("outcome", enforcement.outcome.as_str());
        metrics::record_decision(enforcement.outcome.as_str(), enforcement.state.as_str());
        match enforcement.outcome {
            EnforcementOutcome::Allow => debug!(state = enforcement.state.as_str(), "access allowed"),
            EnforcementOutcome::Deny | EnforcementOutcome::Unauthorized => {
                info!(state = enforcement.state.as_str(), "access denied");
            }
            EnforcementOutcome::Error => {
                warn!(state = enforcement.state.as_str(), "authorization failed, refusing access");
            }
        }
        enforcement
    }

    async fn run(&self, subject: &str, resource: &str) -> Enforcement {
        if !self.filter.is_applicable(resource) {
            return Enforcement::new(EnforcementOutcome::Allow, EnforcementState::FilteredOut);
        }

        if let Some(cached) = self.cache.lookup(subject, resource) {
            debug!(assertions = cached.len(), "using cached decision");
            return Enforcement::new(decide(subject, &cached), EnforcementState::CachedDecision);
        }

        let query = QueryMessage::authz_decision_query(&self.query, subject, resource);
        self.query_and_store(query, subject, resource).await
    }

    /// Send the decision query and cache its result on a separate task, so a
    /// caller dropped mid-query still leaves the answer cached.
    async fn query_and_store(
        &self,
        query: QueryMessage,
        subject: &str,
        resource: &str,
    ) -> Enforcement {
        let client = self.client.clone();
        let cache = Arc::clone(&self.cache);
        let endpoint = self.endpoint.clone();
        let cache_denies = self.cache_denies;
        let subject_owned = subject.to_string();
        let resource_owned = resource.to_string();

        let task = tokio::spawn(async move {
            let result = client.send(&query, &endpoint).await.map(|response| {
                let outcome = decide(&subject_owned, &response.assertions);
                let cacheable = match outcome {
                    EnforcementOutcome::Allow => true,
                    EnforcementOutcome::Deny | EnforcementOutcome::Unauthorized => cache_denies,
                    EnforcementOutcome::Error => false,
                };
                if cacheable {
                    cache.store(&subject_owned, &resource_owned, &response.assertions);
                }
                (response, outcome)
            });
            cache.commit(&subject_owned);
            (query, result)
        });

        let (query, result) = match task.await {
            Ok(joined) => joined,
            Err(e) => {
                let mut enforcement =
                    Enforcement::new(EnforcementOutcome::Error, EnforcementState::QueryFailed);
                enforcement.error = Some(TransportError::connection(
                    &self.endpoint,
                    format!("query task failed: {e}"),
                ));
                return enforcement;
            }
        };

        let mut exchange = QueryExchange {
            endpoint: self.endpoint.clone(),
            query,
            response: None,
        };
        match result {
            Ok((response, outcome)) => {
                exchange.response = Some(response);
                Enforcement {
                    outcome,
                    state: EnforcementState::Decided,
                    exchange: Some(exchange),
                    error: None,
                }
            }
            Err(error) => Enforcement {
                outcome: EnforcementOutcome::Error,
                state: EnforcementState::QueryFailed,
                exchange: Some(exchange),
                error: Some(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::Decision;
    use crate::cache::CacheConfig;
    use crate::fixtures::{decision_assertion, permit_assertion, StubReply, StubTransport};
    use chrono::Utc;
    use std::time::Duration;

    const AUTHZ: &str = "https://authz.example/decision";

    fn enforcer(stub: &Arc<StubTransport>, config: EnforcerConfig) -> PolicyEnforcer {
        PolicyEnforcer::new(
            config,
            LocalPolicyFilter::ignore_list(["^/static/"]).unwrap(),
            Arc::clone(stub) as Arc<dyn DecisionQueryTransport>,
        )
    }

    fn cached_config() -> EnforcerConfig {
        EnforcerConfig::new(AUTHZ).with_cache(CacheConfig::default())
    }

    #[test]
    fn test_decide() {
        let now = Utc::now();
        let permit = permit_assertion("u1", "/r", now, 60);
        let deny = decision_assertion("u1", "/r", Decision::Deny, now, 60);
        let indeterminate = decision_assertion("u1", "/r", Decision::Indeterminate, now, 60);
        let not_applicable = decision_assertion("u1", "/r", Decision::NotApplicable, now, 60);

        assert_eq!(decide("u1", &[permit.clone()]), EnforcementOutcome::Allow);
        assert_eq!(decide("u1", &[permit.clone(), deny.clone()]), EnforcementOutcome::Deny);
        assert_eq!(decide("", &[deny, permit.clone()]), EnforcementOutcome::Unauthorized);
        assert_eq!(decide("u1", &[indeterminate]), EnforcementOutcome::Deny);
        assert_eq!(decide("u1", &[permit, not_applicable]), EnforcementOutcome::Error);
        assert_eq!(decide("u1", &[]), EnforcementOutcome::Error);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(EnforcementOutcome::Allow.status_code(), None);
        assert_eq!(EnforcementOutcome::Deny.status_code(), Some(StatusCode::FORBIDDEN));
        assert_eq!(
            EnforcementOutcome::Unauthorized.status_code(),
            Some(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            EnforcementOutcome::Error.status_code(),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[tokio::test]
    async fn test_filtered_out_skips_network() {
        let stub = Arc::new(StubTransport::new(StubReply::Decisions(vec![Decision::Deny])));
        let pep = enforcer(&stub, cached_config());

        let enforcement = pep.authorize("u1", "/static/logo.png").await;
        assert_eq!(enforcement.outcome, EnforcementOutcome::Allow);
        assert_eq!(enforcement.state, EnforcementState::FilteredOut);
        assert!(enforcement.exchange.is_none());
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_permit_is_cached() {
        let stub = Arc::new(StubTransport::new(StubReply::Decisions(vec![Decision::Permit])));
        let pep = enforcer(&stub, cached_config());

        let first = pep.authorize("u1", "/secure").await;
        let second = pep.authorize("u1", "/secure").await;

        assert_eq!(first.outcome, EnforcementOutcome::Allow);
        assert_eq!(first.state, EnforcementState::Decided);
        assert_eq!(second.outcome, EnforcementOutcome::Allow);
        assert_eq!(second.state, EnforcementState::CachedDecision);
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_caching_disabled_always_queries() {
        let stub = Arc::new(StubTransport::new(StubReply::Decisions(vec![Decision::Permit])));
        let pep = enforcer(&stub, EnforcerConfig::new(AUTHZ));

        pep.authorize("u1", "/secure").await;
        pep.authorize("u1", "/secure").await;
        assert_eq!(stub.call_count(), 2);
    }

    #[tokio::test]
    async fn test_deny_wins() {
        let stub = Arc::new(StubTransport::new(StubReply::Decisions(vec![
            Decision::Permit,
            Decision::Deny,
        ])));
        let pep = enforcer(&stub, cached_config());

        assert_eq!(pep.authorize("u1", "/secure").await.outcome, EnforcementOutcome::Deny);
        assert_eq!(
            pep.authorize("", "/other").await.outcome,
            EnforcementOutcome::Unauthorized
        );
    }

    #[tokio::test]
    async fn test_denies_not_cached_when_disabled() {
        let stub = Arc::new(StubTransport::new(StubReply::Decisions(vec![Decision::Deny])));
        let pep = enforcer(&stub, cached_config().with_cache_denies(false));

        pep.authorize("u1", "/secure").await;
        pep.authorize("u1", "/secure").await;
        assert_eq!(stub.call_count(), 2);
    }

    #[tokio::test]
    async fn test_denies_cached_by_default() {
        let stub = Arc::new(StubTransport::new(StubReply::Decisions(vec![Decision::Deny])));
        let pep = enforcer(&stub, cached_config());

        pep.authorize("u1", "/secure").await;
        let second = pep.authorize("u1", "/secure").await;
        assert_eq!(second.outcome, EnforcementOutcome::Deny);
        assert_eq!(second.state, EnforcementState::CachedDecision);
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_decision_is_error() {
        let stub = Arc::new(StubTransport::new(StubReply::Assertions(vec![])));
        let pep = enforcer(&stub, cached_config());

        let enforcement = pep.authorize("u1", "/secure").await;
        assert_eq!(enforcement.outcome, EnforcementOutcome::Error);
        assert_eq!(enforcement.state, EnforcementState::Decided);
        assert!(pep.cache().lookup("u1", "/secure").is_none());
    }

    #[tokio::test]
    async fn test_status_error_is_error() {
        let stub = Arc::new(StubTransport::new(StubReply::Status(
            crate::transport::ResponseStatus::Requester,
        )));
        let pep = enforcer(&stub, cached_config());

        let enforcement = pep.authorize("u1", "/secure").await;
        assert_eq!(enforcement.outcome, EnforcementOutcome::Error);
        assert_eq!(enforcement.state, EnforcementState::QueryFailed);
        assert!(matches!(enforcement.error, Some(TransportError::Status { .. })));
    }

    #[tokio::test]
    async fn test_exchange_snapshot() {
        let stub = Arc::new(StubTransport::new(StubReply::Decisions(vec![Decision::Permit])));
        let pep = enforcer(&stub, cached_config());

        let enforcement = pep.authorize("u1", "/secure").await;
        let exchange = enforcement.exchange.unwrap();
        assert_eq!(exchange.endpoint, AUTHZ);
        assert_eq!(exchange.query.subject.value, "u1");
        assert_eq!(
            exchange.response.unwrap().in_response_to,
            exchange.query.id
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_still_populates_cache() {
        let stub = Arc::new(StubTransport::new(StubReply::Delayed(
            Duration::from_millis(200),
            Box::new(StubReply::Decisions(vec![Decision::Permit])),
        )));
        let pep = Arc::new(enforcer(&stub, cached_config().with_timeout(Duration::from_secs(5))));

        let caller = {
            let pep = Arc::clone(&pep);
            tokio::spawn(async move { pep.authorize("u1", "/secure").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(500)).await;

        let enforcement = pep.authorize("u1", "/secure").await;
        assert_eq!(enforcement.state, EnforcementState::CachedDecision);
        assert_eq!(enforcement.outcome, EnforcementOutcome::Allow);
        assert_eq!(stub.call_count(), 1);
    }
}
