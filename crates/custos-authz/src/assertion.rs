//! Assertions returned by attribute and decision authorities.
//!
//! An [`Assertion`] is an immutable bundle of statements about a subject,
//! issued by a remote authority with a validity window. Assertions are only
//! ever produced from a query response (or reloaded from a cache store) and
//! are shared read-only between the cache and the enforcer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authorization decision carried by a decision statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Access is permitted.
    Permit,
    /// Access is denied.
    Deny,
    /// The authority could not reach a decision.
    Indeterminate,
    /// No policy applies to the request.
    NotApplicable,
}

impl Decision {
    /// Whether this decision explicitly grants access.
    pub const fn is_permit(self) -> bool {
        matches!(self, Self::Permit)
    }

    /// Whether this decision must fail the request.
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Deny | Self::Indeterminate)
    }

    /// Canonical string form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Permit => "Permit",
            Self::Deny => "Deny",
            Self::Indeterminate => "Indeterminate",
            Self::NotApplicable => "NotApplicable",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "permit" => Ok(Self::Permit),
            "deny" => Ok(Self::Deny),
            "indeterminate" => Ok(Self::Indeterminate),
            "notapplicable" | "not_applicable" => Ok(Self::NotApplicable),
            _ => Err(format!("unknown decision: {s}")),
        }
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeValue(String);

impl AttributeValue {
    /// Create a new attribute value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the value as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A named attribute with one or more values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name (the attribute ID).
    pub name: String,
    /// Attribute name format / data type identifier.
    pub name_format: String,
    /// Attribute values.
    pub values: Vec<AttributeValue>,
}

impl Attribute {
    /// Whether this attribute answers a query for `name` in `format`.
    pub fn matches(&self, name: &str, format: &str) -> bool {
        self.name == name && self.name_format == format
    }
}

/// An authorization decision about a resource and action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthzDecisionStatement {
    /// Resource the decision applies to.
    pub resource: String,
    /// Action the decision applies to.
    pub action: String,
    /// The decision.
    pub decision: Decision,
}

/// An issued, time-bounded set of statements about a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assertion {
    id: String,
    issuer: String,
    subject: String,
    issue_instant: DateTime<Utc>,
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: Option<DateTime<Utc>>,
    #[serde(default)]
    attributes: Vec<Attribute>,
    #[serde(default)]
    decisions: Vec<AuthzDecisionStatement>,
}

impl Assertion {
    /// Start building an assertion issued at `issue_instant`.
    pub fn builder(
        id: impl Into<String>,
        issuer: impl Into<String>,
        subject: impl Into<String>,
        issue_instant: DateTime<Utc>,
    ) -> AssertionBuilder {
        AssertionBuilder {
            assertion: Self {
                id: id.into(),
                issuer: issuer.into(),
                subject: subject.into(),
                issue_instant,
                not_before: None,
                not_on_or_after: None,
                attributes: Vec::new(),
                decisions: Vec::new(),
            },
        }
    }

    /// Assertion identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Issuer identity.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Subject the assertion is about.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// When the assertion was issued.
    pub fn issue_instant(&self) -> DateTime<Utc> {
        self.issue_instant
    }

    /// Start of the validity window, if bounded.
    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    /// End (exclusive) of the validity window, if bounded.
    pub fn not_on_or_after(&self) -> Option<DateTime<Utc>> {
        self.not_on_or_after
    }

    /// Attribute statements.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Authorization decision statements.
    pub fn decisions(&self) -> &[AuthzDecisionStatement] {
        &self.decisions
    }

    /// Check the validity window against `now`, allowing `skew` either way.
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        if let Some(not_before) = self.not_before {
            if now.checked_add_signed(skew).is_some_and(|t| t < not_before) {
                return false;
            }
        }
        if let Some(not_on_or_after) = self.not_on_or_after {
            if now.checked_sub_signed(skew).is_some_and(|t| t >= not_on_or_after) {
                return false;
            }
        }
        true
    }

    /// Whether any attribute statement answers `name` in `format`.
    pub fn has_attribute(&self, name: &str, format: &str) -> bool {
        self.attributes.iter().any(|a| a.matches(name, format))
    }

    /// All values of attributes matching `name` in `format`.
    pub fn attribute_values<'a>(
        &'a self,
        name: &'a str,
        format: &'a str,
    ) -> impl Iterator<Item = &'a AttributeValue> + 'a {
        self.attributes
            .iter()
            .filter(move |a| a.matches(name, format))
            .flat_map(|a| a.values.iter())
    }

    /// Whether this assertion's validity window contains `other`'s.
    fn outlasts(&self, other: &Self) -> bool {
        let starts_first = match (self.not_before, other.not_before) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => mine <= theirs,
        };
        let ends_last = match (self.not_on_or_after, other.not_on_or_after) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => mine >= theirs,
        };
        starts_first && ends_last
    }

    /// This assertion reduced to the statements `held` does not already
    /// carry for at least as long.
    ///
    /// Attribute values are compared by name, format and value, decision
    /// statements by resource, action and decision. Returns `None` when
    /// nothing new is left.
    pub(crate) fn novel_against(&self, held: &[Self]) -> Option<Self> {
        if held.contains(self) {
            return None;
        }

        let covering: Vec<&Self> = held.iter().filter(|h| h.outlasts(self)).collect();
        if covering.is_empty() || (self.attributes.is_empty() && self.decisions.is_empty()) {
            return Some(self.clone());
        }

        let attributes: Vec<Attribute> = self
            .attributes
            .iter()
            .filter_map(|attribute| {
                let (name, format) = (attribute.name.as_str(), attribute.name_format.as_str());
                if attribute.values.is_empty() {
                    let known = covering.iter().any(|h| h.has_attribute(name, format));
                    return (!known).then(|| attribute.clone());
                }
                let values: Vec<AttributeValue> = attribute
                    .values
                    .iter()
                    .filter(|value| {
                        !covering
                            .iter()
                            .any(|h| h.attribute_values(name, format).any(|v| v == *value))
                    })
                    .cloned()
                    .collect();
                (!values.is_empty()).then(|| Attribute {
                    name: attribute.name.clone(),
                    name_format: attribute.name_format.clone(),
                    values,
                })
            })
            .collect();

        let decisions: Vec<AuthzDecisionStatement> = self
            .decisions
            .iter()
            .filter(|statement| !covering.iter().any(|h| h.decisions.contains(statement)))
            .cloned()
            .collect();

        if attributes.is_empty() && decisions.is_empty() {
            return None;
        }

        let mut novel = self.clone();
        novel.attributes = attributes;
        novel.decisions = decisions;
        Some(novel)
    }
}

/// Builder for [`Assertion`].
#[derive(Debug, Clone)]
pub struct AssertionBuilder {
    assertion: Assertion,
}

impl AssertionBuilder {
    /// Bound the validity window.
    pub fn valid_between(
        mut self,
        not_before: Option<DateTime<Utc>>,
        not_on_or_after: Option<DateTime<Utc>>,
    ) -> Self {
        self.assertion.not_before = not_before;
        self.assertion.not_on_or_after = not_on_or_after;
        self
    }

    /// Add an attribute statement.
    pub fn attribute<I, V>(mut self, name: impl Into<String>, format: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        self.assertion.attributes.push(Attribute {
            name: name.into(),
            name_format: format.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Add an authorization decision statement.
    pub fn decision(
        mut self,
        resource: impl Into<String>,
        action: impl Into<String>,
        decision: Decision,
    ) -> Self {
        self.assertion.decisions.push(AuthzDecisionStatement {
            resource: resource.into(),
            action: action.into(),
            decision,
        });
        self
    }

    /// Finish the assertion.
    pub fn build(self) -> Assertion {
        self.assertion
    }
}
