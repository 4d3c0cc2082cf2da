//! Custos Authorization - Policy Enforcement and Attribute Resolution
//!
//! This crate is the core of Custos: it decides whether a subject may access
//! a resource by combining a cheap local filter with queries to remote
//! authorization and attribute services, caching the returned assertions per
//! subject.
//!
//! # Overview
//!
//! - [`PolicyEnforcer`] (PEP) runs the enforcement state machine and turns
//!   every result, including failures, into an [`EnforcementOutcome`]
//! - [`AttributeResolver`] (PIP) routes attribute requests to the Attribute
//!   Authority mapped for the attribute
//! - [`DecisionCache`] keeps assertions per subject until they expire, with
//!   optional persistence through a [`CacheStore`]
//! - [`LocalPolicyFilter`] exempts resources before any network call
//!
//! # Architecture
//!
//! ```text
//!     subject, resource
//!            │
//!     ┌──────▼───────────┐  not applicable
//!     │ LocalPolicyFilter├────────────────────────► Allow
//!     └──────┬───────────┘
//!            │
//!     ┌──────▼───────────┐  fresh assertions
//!     │  DecisionCache   ├────────────┐
//!     └──────┬───────────┘            │
//!            │ miss                   │
//!     ┌──────▼───────────┐            │
//!     │   QueryClient    │            │
//!     │ (timeout, checks)│            │
//!     └──────┬───────────┘            │
//!            │ DecisionQueryTransport │
//!     ┌──────▼───────────┐            │
//!     │  authz service   │            │
//!     └──────┬───────────┘            │
//!            └────────────┬───────────┘
//!                  ┌──────▼──────┐
//!                  │   decide    ├──► Allow | Deny | Unauthorized | Error
//!                  └─────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use custos_authz::{
//!     CacheConfig, EnforcerConfig, LocalPolicyFilter, PolicyEnforcer,
//! };
//!
//! let config = EnforcerConfig::new("https://authz.example/decision")
//!     .with_cache(CacheConfig::production());
//! let filter = LocalPolicyFilter::ignore_list(["^/static/"])?;
//! let pep = PolicyEnforcer::new(config, filter, transport);
//!
//! let enforcement = pep.authorize("https://openid.example/alice", "/data").await;
//! if let Some(status) = enforcement.outcome.status_code() {
//!     return reject(status);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod assertion;
pub mod cache;
pub mod clock;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod filter;
#[cfg(any(test, feature = "test-util"))]
pub mod fixtures;
pub mod mapping;
pub mod metrics;
pub mod resolver;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use assertion::{Assertion, AttributeValue, Decision};
pub use cache::{CacheConfig, CacheStats, DecisionCache};
pub use clock::{Clock, SystemClock};
pub use config::{EnforcerConfig, QueryTemplate, ResolverConfig};
pub use enforcer::{Enforcement, EnforcementOutcome, EnforcementState, PolicyEnforcer};
pub use error::{AuthzError, AuthzResult, TransportError, TransportResult};
pub use filter::{LocalPolicyEvaluator, LocalPolicyFilter};
pub use mapping::{AttributeAuthorityMap, MappingLoader};
pub use resolver::AttributeResolver;
pub use store::{CacheStore, FileStore, MemoryStore};
pub use transport::{DecisionQueryTransport, QueryClient, QueryMessage, ResponseMessage};
