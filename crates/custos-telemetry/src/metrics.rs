//! Prometheus exporter for Custos counters.
//!
//! The counters themselves are recorded by `custos-authz` through the
//! `metrics` facade. This module installs the exporter and describes them.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `custos_authz_decisions_total` | Counter | `outcome`, `state` |
//! | `custos_authz_cache_lookups_total` | Counter | `cache`, `result` |
//! | `custos_authz_queries_total` | Counter | `kind`, `result` |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use custos_authz::metrics::{CACHE_LOOKUPS_TOTAL, DECISIONS_TOTAL, QUERIES_TOTAL};
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether the exporter is installed.
    pub enabled: bool,

    /// Address to serve `/metrics` on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

impl MetricsConfig {
    /// An enabled exporter on `addr`.
    #[must_use]
    pub fn listening_on(addr: impl Into<String>) -> Self {
        Self {
            enabled: true,
            addr: addr.into(),
        }
    }
}

/// Installs the Prometheus exporter as the global recorder.
///
/// The HTTP listener runs on the ambient tokio runtime when there is one,
/// otherwise on a background thread.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` if the exporter cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    register_metric_descriptions();

    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(
        DECISIONS_TOTAL,
        "Authorization requests by enforcement outcome and terminal state"
    );
    describe_counter!(
        CACHE_LOOKUPS_TOTAL,
        "Decision and attribute cache lookups by hit or miss"
    );
    describe_counter!(
        QUERIES_TOTAL,
        "Decision and attribute queries sent to remote services by result"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_address() {
        let config = MetricsConfig::listening_on("not-an-address");
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }
}
