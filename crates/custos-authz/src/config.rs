//! Configuration for the enforcer and resolver.

use std::time::Duration;

use crate::cache::CacheConfig;

/// Constant parts of every outgoing query.
///
/// The subject value is supplied per request and is not part of the
/// template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    /// Identity of the querying party.
    pub issuer_name: String,
    /// Format of the issuer identity.
    pub issuer_format: String,
    /// Format of subject identifiers.
    pub subject_id_format: String,
    /// Action identifier sent with decision queries.
    pub action: String,
}

impl Default for QueryTemplate {
    fn default() -> Self {
        Self {
            issuer_name: "custos".to_string(),
            issuer_format: "urn:oasis:names:tc:SAML:1.1:nameid-format:X509SubjectName".to_string(),
            subject_id_format: "urn:esg:openid".to_string(),
            action: "GET".to_string(),
        }
    }
}

impl QueryTemplate {
    /// Set the issuer identity and format.
    pub fn with_issuer(mut self, name: impl Into<String>, format: impl Into<String>) -> Self {
        self.issuer_name = name.into();
        self.issuer_format = format.into();
        self
    }

    /// Set the subject identifier format.
    pub fn with_subject_id_format(mut self, format: impl Into<String>) -> Self {
        self.subject_id_format = format.into();
        self
    }

    /// Set the action identifier.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }
}

/// Configuration for the [`PolicyEnforcer`](crate::enforcer::PolicyEnforcer).
#[derive(Debug, Clone)]
pub struct EnforcerConfig {
    /// Endpoint of the authorization decision service.
    pub authz_service_uri: String,
    /// Whether responses containing a failing decision are cached too.
    pub cache_denies: bool,
    /// Query constants.
    pub query: QueryTemplate,
    /// Timeout for decision queries.
    pub timeout: Duration,
    /// Decision cache configuration; `enabled` turns decision caching on.
    pub cache: CacheConfig,
}

impl EnforcerConfig {
    /// Create a configuration for the given authorization service.
    pub fn new(authz_service_uri: impl Into<String>) -> Self {
        Self {
            authz_service_uri: authz_service_uri.into(),
            cache_denies: true,
            query: QueryTemplate::default(),
            timeout: Duration::from_secs(10),
            cache: CacheConfig::disabled(),
        }
    }

    /// Enable decision caching with the given cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Choose whether failing decisions are cached.
    pub fn with_cache_denies(mut self, cache_denies: bool) -> Self {
        self.cache_denies = cache_denies;
        self
    }

    /// Set the query template.
    pub fn with_query(mut self, query: QueryTemplate) -> Self {
        self.query = query;
        self
    }

    /// Set the query timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for the [`AttributeResolver`](crate::resolver::AttributeResolver).
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Query constants.
    pub query: QueryTemplate,
    /// Timeout for attribute queries.
    pub timeout: Duration,
    /// Attribute cache configuration; `enabled` turns session caching on.
    pub cache: CacheConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            query: QueryTemplate::default(),
            timeout: Duration::from_secs(10),
            cache: CacheConfig::default(),
        }
    }
}

impl ResolverConfig {
    /// Set the query template.
    pub fn with_query(mut self, query: QueryTemplate) -> Self {
        self.query = query;
        self
    }

    /// Set the query timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}
