//! Local pre-filter applied before any remote query.
//!
//! A [`LocalPolicyFilter`] decides whether a resource needs authorization at
//! all. It never grants access by itself: a resource it deems applicable is
//! always checked upstream.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::assertion::Decision;
use crate::error::{AuthzError, AuthzResult};

/// A cheap local rule engine consulted for resources not covered by an
/// ignore list.
pub trait LocalPolicyEvaluator: Send + Sync + fmt::Debug {
    /// Evaluate local rules for `resource`.
    fn evaluate(&self, resource: &str) -> Decision;
}

#[derive(Debug, Clone)]
enum Rule {
    Always,
    IgnoreList(Vec<Regex>),
    Evaluator(Arc<dyn LocalPolicyEvaluator>),
}

/// Decides whether a resource must be authorized upstream.
#[derive(Debug, Clone)]
pub struct LocalPolicyFilter {
    rule: Rule,
}

impl Default for LocalPolicyFilter {
    fn default() -> Self {
        Self::always()
    }
}

impl LocalPolicyFilter {
    /// A filter that sends every resource upstream.
    pub fn always() -> Self {
        Self { rule: Rule::Always }
    }

    /// A filter that bypasses resources matching any of `patterns`.
    ///
    /// Patterns match at the start of the resource identifier. An empty
    /// list is the same as [`LocalPolicyFilter::always`].
    pub fn ignore_list<I, S>(patterns: I) -> AuthzResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|pattern| compile(pattern.as_ref()))
            .collect::<AuthzResult<Vec<_>>>()?;

        if compiled.is_empty() {
            return Ok(Self::always());
        }
        Ok(Self {
            rule: Rule::IgnoreList(compiled),
        })
    }

    /// A filter that delegates to a local evaluator.
    pub fn evaluator(evaluator: Arc<dyn LocalPolicyEvaluator>) -> Self {
        Self {
            rule: Rule::Evaluator(evaluator),
        }
    }

    /// Build a filter from optional configuration.
    ///
    /// An ignore list and an evaluator are alternatives; configuring both is
    /// an error.
    pub fn from_parts(
        ignore_patterns: &[String],
        evaluator: Option<Arc<dyn LocalPolicyEvaluator>>,
    ) -> AuthzResult<Self> {
        match evaluator {
            Some(_) if !ignore_patterns.is_empty() => Err(AuthzError::config(
                "an ignore list and a local policy evaluator are mutually exclusive",
            )),
            Some(evaluator) => Ok(Self::evaluator(evaluator)),
            None => Self::ignore_list(ignore_patterns),
        }
    }

    /// Whether `resource` must be authorized upstream.
    pub fn is_applicable(&self, resource: &str) -> bool {
        match &self.rule {
            Rule::Always => true,
            Rule::IgnoreList(patterns) => {
                if let Some(pattern) = patterns.iter().find(|p| p.is_match(resource)) {
                    debug!(resource, pattern = pattern.as_str(), "resource matches ignore list");
                    return false;
                }
                true
            }
            Rule::Evaluator(evaluator) => {
                let decision = evaluator.evaluate(resource);
                if decision == Decision::NotApplicable {
                    debug!(resource, "local policy not applicable, bypassing");
                    return false;
                }
                debug!(resource, %decision, "local policy applies, asking upstream");
                true
            }
        }
    }
}

fn compile(pattern: &str) -> AuthzResult<Regex> {
    Regex::new(&format!("^(?:{pattern})"))
        .map_err(|e| AuthzError::config(format!("invalid ignore pattern {pattern:?}: {e}")))
}
