//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Constant parts of outgoing queries.
///
/// Has no subject field; the subject is taken from each request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Identity of the querying party.
    #[serde(default = "default_issuer_name")]
    pub issuer_name: String,

    /// Format of the issuer identity.
    #[serde(default = "default_issuer_format")]
    pub issuer_format: String,

    /// Format of subject identifiers.
    #[serde(default = "default_subject_id_format")]
    pub subject_id_format: String,

    /// Action identifier sent with decision queries.
    #[serde(default = "default_action")]
    pub action: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            issuer_name: default_issuer_name(),
            issuer_format: default_issuer_format(),
            subject_id_format: default_subject_id_format(),
            action: default_action(),
        }
    }
}

fn default_issuer_name() -> String {
    "custos".to_string()
}

fn default_issuer_format() -> String {
    "urn:oasis:names:tc:SAML:1.1:nameid-format:X509SubjectName".to_string()
}

fn default_subject_id_format() -> String {
    "urn:esg:openid".to_string()
}

fn default_action() -> String {
    "GET".to_string()
}

/// Settings for the query binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    /// Query timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Tolerance in seconds applied either way to assertion validity times.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: f64,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            clock_skew_secs: default_clock_skew(),
        }
    }
}

impl BindingConfig {
    /// The query timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The clock skew tolerance. Invalid values count as zero.
    pub fn clock_skew(&self) -> Duration {
        Duration::try_from_secs_f64(self.clock_skew_secs).unwrap_or(Duration::ZERO)
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_clock_skew() -> f64 {
    1.0
}

/// Policy enforcement point settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PepConfig {
    /// Endpoint of the authorization decision service.
    #[serde(default)]
    pub authz_service_uri: String,

    /// Cache decisions per subject and resource.
    #[serde(default)]
    pub cache_decisions: bool,

    /// Also cache failing decisions.
    #[serde(default = "default_true")]
    pub cache_denies: bool,

    /// Resources matching any of these patterns bypass authorization.
    /// Patterns match at the start of the resource.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Decision query settings.
    #[serde(default)]
    pub query: QueryConfig,

    /// Decision query binding settings.
    #[serde(default)]
    pub binding: BindingConfig,
}

impl Default for PepConfig {
    fn default() -> Self {
        Self {
            authz_service_uri: String::new(),
            cache_decisions: false,
            cache_denies: true,
            ignore_patterns: Vec::new(),
            query: QueryConfig::default(),
            binding: BindingConfig::default(),
        }
    }
}

/// Policy information point settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipConfig {
    /// Enable attribute resolution.
    #[serde(default)]
    pub enabled: bool,

    /// File mapping attribute IDs to Attribute Authorities.
    #[serde(default)]
    pub mapping_file: Option<String>,

    /// Cache attribute query results per subject.
    #[serde(default = "default_true")]
    pub cache_sessions: bool,

    /// Directory for persisted caches. Caches stay in memory when unset.
    #[serde(default)]
    pub cache_data_dir: Option<String>,

    /// Lifetime of individual cache entries in seconds. No expiry when
    /// unset.
    #[serde(default)]
    pub cache_timeout_secs: Option<u64>,

    /// Attribute query settings.
    #[serde(default)]
    pub query: QueryConfig,

    /// Attribute query binding settings.
    #[serde(default)]
    pub binding: BindingConfig,
}

impl Default for PipConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mapping_file: None,
            cache_sessions: true,
            cache_data_dir: None,
            cache_timeout_secs: None,
            query: QueryConfig::default(),
            binding: BindingConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured logs.
    #[default]
    Json,
    /// Human-readable logs.
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::Json,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus metrics endpoint address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pep_defaults() {
        let pep = PepConfig::default();
        assert!(!pep.cache_decisions);
        assert!(pep.cache_denies);
        assert_eq!(pep.binding.timeout(), Duration::from_secs(10));
        assert_eq!(pep.binding.clock_skew(), Duration::from_secs(1));
    }

    #[test]
    fn test_negative_skew_is_zero() {
        let binding = BindingConfig {
            timeout_ms: 1,
            clock_skew_secs: -3.0,
        };
        assert_eq!(binding.clock_skew(), Duration::ZERO);
    }

    #[test]
    fn test_query_rejects_subject_id() {
        let result: Result<QueryConfig, _> = toml::from_str(r#"subject_id = "alice""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_log_format_serde() {
        let logging: LoggingConfig = toml::from_str(r#"format = "pretty""#).unwrap();
        assert_eq!(logging.format, LogFormat::Pretty);
        assert_eq!(logging.level, "info");
    }
}
