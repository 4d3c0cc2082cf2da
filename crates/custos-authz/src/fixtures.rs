//! Test fixtures for enforcers, resolvers and caches.
//!
//! These are used by this crate's own tests and by downstream crates that
//! want to exercise the enforcement pipeline without a real authority.
//! Outside this crate's tests they need the `test-util` feature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::assertion::{Assertion, Decision};
use crate::clock::{Clock, SystemClock};
use crate::error::{TransportError, TransportResult};
use crate::filter::LocalPolicyEvaluator;
use crate::transport::{
    BoxFuture, DecisionQueryTransport, QueryBody, QueryMessage, ResponseMessage, ResponseStatus,
};

/// Issuer used for fixture assertions.
pub const FIXTURE_ISSUER: &str = "https://authority.example/";

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock();
        *now = now.checked_add_signed(by).unwrap_or(*now);
    }

    /// Set the clock to an absolute instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Default for ManualClock {
    /// 2024-01-01T00:00:00Z.
    fn default() -> Self {
        Self::at(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

fn window(now: DateTime<Utc>, ttl_secs: i64) -> Option<DateTime<Utc>> {
    now.checked_add_signed(chrono::Duration::seconds(ttl_secs))
}

/// An assertion carrying one decision statement, valid for `ttl_secs` from
/// `now`. The id is derived from the inputs so equal calls give equal
/// assertions.
pub fn decision_assertion(
    subject: &str,
    resource: &str,
    decision: Decision,
    now: DateTime<Utc>,
    ttl_secs: i64,
) -> Assertion {
    Assertion::builder(
        format!("_{subject}|{resource}|{decision}|{}|{ttl_secs}", now.timestamp()),
        FIXTURE_ISSUER,
        subject,
        now,
    )
    .valid_between(Some(now), window(now, ttl_secs))
    .decision(resource, "GET", decision)
    .build()
}

/// A permit for `subject` on `resource`.
pub fn permit_assertion(
    subject: &str,
    resource: &str,
    now: DateTime<Utc>,
    ttl_secs: i64,
) -> Assertion {
    decision_assertion(subject, resource, Decision::Permit, now, ttl_secs)
}

/// A deny for `subject` on `resource`.
pub fn deny_assertion(
    subject: &str,
    resource: &str,
    now: DateTime<Utc>,
    ttl_secs: i64,
) -> Assertion {
    decision_assertion(subject, resource, Decision::Deny, now, ttl_secs)
}

/// An assertion carrying one attribute statement.
pub fn attribute_assertion(
    subject: &str,
    name: &str,
    format: &str,
    values: &[&str],
    now: DateTime<Utc>,
    ttl_secs: i64,
) -> Assertion {
    Assertion::builder(
        format!("_{subject}|{name}|{}|{ttl_secs}", now.timestamp()),
        FIXTURE_ISSUER,
        subject,
        now,
    )
    .valid_between(Some(now), window(now, ttl_secs))
    .attribute(name, format, values.iter().copied())
    .build()
}

/// How a [`StubTransport`] answers.
#[derive(Debug, Clone)]
pub enum StubReply {
    /// Succeed with exactly these assertions.
    Assertions(Vec<Assertion>),
    /// Succeed with one assertion holding these decisions for the queried
    /// resource.
    Decisions(Vec<Decision>),
    /// Succeed with one assertion holding the queried attribute with these
    /// values.
    Values(Vec<String>),
    /// Answer with a non-success status.
    Status(ResponseStatus),
    /// Succeed, but correlated to some other query.
    Uncorrelated,
    /// Fail with a transport error.
    Fail(TransportError),
    /// Never answer.
    Hang,
    /// Wait, then answer.
    Delayed(Duration, Box<StubReply>),
}

/// An in-process authority with a scripted reply.
#[derive(Debug)]
pub struct StubTransport {
    reply: Mutex<StubReply>,
    clock: Arc<dyn Clock>,
    ttl_secs: i64,
    calls: Mutex<Vec<(String, QueryMessage)>>,
    in_flight: AtomicUsize,
}

impl StubTransport {
    /// Create a stub answering with `reply`.
    pub fn new(reply: StubReply) -> Self {
        Self {
            reply: Mutex::new(reply),
            clock: Arc::new(SystemClock),
            ttl_secs: 3600,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Stamp generated assertions with `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validity of generated assertions.
    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Change the reply for subsequent queries.
    pub fn set_reply(&self, reply: StubReply) {
        *self.reply.lock() = reply;
    }

    /// Number of queries received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Queries received, with the endpoint each was sent to.
    pub fn calls(&self) -> Vec<(String, QueryMessage)> {
        self.calls.lock().clone()
    }

    /// Queries started but not yet answered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn answer(&self, query: &QueryMessage, reply: StubReply) -> TransportResult<ResponseMessage> {
        let now = self.clock.now();
        let subject = query.subject.value.as_str();
        match reply {
            StubReply::Assertions(assertions) => Ok(ResponseMessage::success(query, assertions)),
            StubReply::Decisions(decisions) => {
                let (resource, action) = match &query.body {
                    QueryBody::AuthzDecision { resource, action } => {
                        (resource.as_str(), action.as_str())
                    }
                    QueryBody::Attribute { .. } => ("", ""),
                };
                let mut builder = Assertion::builder(
                    format!("_{}", query.id),
                    FIXTURE_ISSUER,
                    subject,
                    now,
                )
                .valid_between(Some(now), window(now, self.ttl_secs));
                for decision in decisions {
                    builder = builder.decision(resource, action, decision);
                }
                Ok(ResponseMessage::success(query, vec![builder.build()]))
            }
            StubReply::Values(values) => {
                let mut builder = Assertion::builder(
                    format!("_{}", query.id),
                    FIXTURE_ISSUER,
                    subject,
                    now,
                )
                .valid_between(Some(now), window(now, self.ttl_secs));
                if let QueryBody::Attribute { attributes } = &query.body {
                    for requested in attributes {
                        builder = builder.attribute(
                            &requested.name,
                            &requested.name_format,
                            values.iter().map(String::as_str),
                        );
                    }
                }
                Ok(ResponseMessage::success(query, vec![builder.build()]))
            }
            StubReply::Status(status) => Ok(ResponseMessage {
                in_response_to: query.id.clone(),
                status,
                assertions: Vec::new(),
            }),
            StubReply::Uncorrelated => Ok(ResponseMessage {
                in_response_to: format!("{}-other", query.id),
                status: ResponseStatus::Success,
                assertions: Vec::new(),
            }),
            StubReply::Fail(error) => Err(error),
            // Unwrapped before answering.
            StubReply::Hang | StubReply::Delayed(..) => Err(TransportError::connection(
                "stub",
                "unexpected reply state",
            )),
        }
    }
}

impl DecisionQueryTransport for StubTransport {
    fn send<'a>(
        &'a self,
        query: &'a QueryMessage,
        endpoint: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, TransportResult<ResponseMessage>> {
        self.calls.lock().push((endpoint.to_string(), query.clone()));

        let mut reply = self.reply.lock().clone();
        let mut delay = Duration::ZERO;
        while let StubReply::Delayed(by, inner) = reply {
            delay += by;
            reply = *inner;
        }

        Box::pin(async move {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            if matches!(reply, StubReply::Hang) {
                std::future::pending::<()>().await;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.answer(query, reply)
        })
    }
}

/// A local evaluator that always returns the same decision and counts
/// evaluations.
#[derive(Debug)]
pub struct FixedEvaluator {
    decision: Decision,
    evaluations: AtomicUsize,
}

impl FixedEvaluator {
    /// Create an evaluator returning `decision`.
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            evaluations: AtomicUsize::new(0),
        }
    }

    /// Number of evaluations performed.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

impl LocalPolicyEvaluator for FixedEvaluator {
    fn evaluate(&self, _resource: &str) -> Decision {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.decision
    }
}
