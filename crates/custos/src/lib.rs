//! # Custos
//!
//! **Policy enforcement and attribute resolution for web services**
//!
//! Custos sits in front of protected resources and answers one question per
//! request: may this subject access this resource? It provides:
//!
//! - **Local filtering** – ignore lists or a local evaluator exempt resources
//!   without a network round-trip
//! - **Remote decisions** – authorization decision queries to a central
//!   service, with per-subject caching of the returned assertions
//! - **Attribute resolution** – attribute queries routed to the Attribute
//!   Authority mapped for each attribute
//! - **Safe defaults** – every failure becomes a rejecting outcome
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use custos::prelude::*;
//!
//! let config = ConfigLoader::new()
//!     .with_file("custos.toml")?
//!     .with_env_prefix("CUSTOS")
//!     .load()?;
//! custos::init_telemetry(&config)?;
//!
//! let gateway = Gateway::builder(config).transport(transport).build()?;
//!
//! match gateway.authorize(&subject, request.uri().path()).await.outcome.status_code() {
//!     None => forward(request).await,
//!     Some(status) => reject(status),
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! CustosConfig ─► Gateway ─► PolicyEnforcer ─► LocalPolicyFilter
//!                    │             │
//!                    │             └─► DecisionCache ─► QueryClient ─► authz service
//!                    │
//!                    └─► AttributeResolver ─► DecisionCache ─► QueryClient ─► attribute authorities
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod gateway;

// Re-export the authorization core
pub use custos_authz as authz;

// Re-export configuration
pub use custos_config as config;

// Re-export telemetry setup
pub use custos_telemetry as telemetry;

pub use custos_config::ConfigLoader;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewayBuilder};

use custos_config::{CustosConfig, LogFormat};
use custos_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use custos::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{ConfigLoader, Gateway, GatewayError, GatewayResult};
    pub use custos_authz::{
        AttributeValue, AuthzError, Decision, DecisionQueryTransport, Enforcement,
        EnforcementOutcome, LocalPolicyEvaluator,
    };
    pub use custos_config::CustosConfig;
}

/// Telemetry settings for the logging and metrics sections of `config`.
pub fn telemetry_config(config: &CustosConfig) -> TelemetryConfig {
    let logging = match config.logging.format {
        LogFormat::Json => LogConfig::production(),
        LogFormat::Pretty => LogConfig::development(),
    };

    TelemetryConfig {
        logging: LogConfig {
            enabled: config.logging.enabled,
            ..logging.with_level(config.logging.level.clone())
        },
        metrics: MetricsConfig {
            enabled: config.metrics.enabled,
            addr: config.metrics.addr.clone(),
        },
    }
}

/// Install the global log subscriber and metrics exporter described by
/// `config`.
pub fn init_telemetry(config: &CustosConfig) -> GatewayResult<()> {
    custos_telemetry::init_telemetry(&telemetry_config(config))?;
    Ok(())
}
