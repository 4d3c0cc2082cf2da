//! Gateway construction errors.

use custos_authz::AuthzError;
use custos_config::ConfigError;
use custos_telemetry::TelemetryError;
use thiserror::Error;

/// Errors raised while building a [`Gateway`](crate::Gateway) or setting up
/// telemetry.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Failed to build a component (filter, mapping table, cache store).
    #[error(transparent)]
    Authz(#[from] AuthzError),

    /// Failed to initialize logging or metrics.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// No transport was supplied.
    #[error("no decision query transport configured")]
    MissingTransport,
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
