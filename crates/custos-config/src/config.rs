//! Main configuration types.
//!
//! This module provides the top-level [`CustosConfig`] struct.

use serde::{Deserialize, Serialize};

use crate::{BindingConfig, ConfigError, LoggingConfig, MetricsConfig, PepConfig, PipConfig};

/// Complete Custos configuration.
///
/// This is the root configuration type that contains all configuration sections.
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files,
/// flat key/value pairs and environment variables.
///
/// # Example
///
/// ```
/// use custos_config::CustosConfig;
///
/// let config = CustosConfig::default();
/// assert!(!config.pep.cache_decisions);
/// assert!(!config.pip.enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CustosConfig {
    /// Policy enforcement point.
    #[serde(default)]
    pub pep: PepConfig,

    /// Policy information point.
    #[serde(default)]
    pub pip: PipConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics exporter.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl CustosConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `pep.authz_service_uri` is empty
    /// - the PIP is enabled without a mapping file
    /// - a timeout is zero or a clock skew is negative or not finite
    /// - an ignore pattern does not compile
    /// - the metrics exporter is enabled with an invalid address
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pep.authz_service_uri.trim().is_empty() {
            return Err(ConfigError::missing_field("pep.authz_service_uri"));
        }

        validate_binding("pep.binding", &self.pep.binding)?;

        for pattern in &self.pep.ignore_patterns {
            if let Err(e) = regex::Regex::new(&format!("^(?:{pattern})")) {
                return Err(ConfigError::invalid_value(
                    "pep.ignore_patterns",
                    format!("invalid pattern {pattern:?}: {e}"),
                ));
            }
        }

        if self.pip.enabled {
            if self
                .pip
                .mapping_file
                .as_deref()
                .map_or(true, |path| path.trim().is_empty())
            {
                return Err(ConfigError::missing_field("pip.mapping_file"));
            }
            validate_binding("pip.binding", &self.pip.binding)?;
        }

        if self.pip.cache_timeout_secs == Some(0) {
            return Err(ConfigError::invalid_value(
                "pip.cache_timeout_secs",
                "must be greater than 0; leave unset for no expiry",
            ));
        }

        if self.metrics.enabled && self.metrics.addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "metrics.addr",
                format!("invalid socket address: {}", self.metrics.addr),
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Pretty debug logs, decision caching on, metrics off.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.logging.format = crate::LogFormat::Pretty;
        config.pep.cache_decisions = true;
        config.pep.binding.clock_skew_secs = 5.0;
        config
    }

    /// Create a production configuration preset.
    ///
    /// JSON info logs, decision caching on, metrics exporter on.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.logging.level = "info".to_string();
        config.logging.format = crate::LogFormat::Json;
        config.pep.cache_decisions = true;
        config.metrics.enabled = true;
        config
    }
}

fn validate_binding(section: &str, binding: &BindingConfig) -> Result<(), ConfigError> {
    if binding.timeout_ms == 0 {
        return Err(ConfigError::invalid_value(
            format!("{section}.timeout_ms"),
            "must be greater than 0",
        ));
    }
    if !binding.clock_skew_secs.is_finite() || binding.clock_skew_secs < 0.0 {
        return Err(ConfigError::invalid_value(
            format!("{section}.clock_skew_secs"),
            "must be a finite, non-negative number of seconds",
        ));
    }
    Ok(())
}
