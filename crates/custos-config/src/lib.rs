//! Typed configuration for Custos.
//!
//! This crate provides a strongly-typed configuration system with support for:
//! - TOML and JSON configuration files
//! - Flat dotted key/value pairs checked against a fixed schema
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//!
//! # Overview
//!
//! [`CustosConfig`] holds every section:
//!
//! - [`PepConfig`] - authorization service, decision caching, ignore list
//! - [`PipConfig`] - attribute mapping file and attribute cache
//! - [`LoggingConfig`] - log level and format
//! - [`MetricsConfig`] - Prometheus exporter
//!
//! Both the PEP and PIP carry a [`QueryConfig`] and a [`BindingConfig`].
//!
//! # Configuration File Format
//!
//! ```toml
//! [pep]
//! authz_service_uri = "https://authz.example/decision"
//! cache_decisions = true
//! ignore_patterns = ["^/static/", ".*\\.ico$"]
//!
//! [pep.query]
//! issuer_name = "/O=Example/CN=gateway"
//! action = "GET"
//!
//! [pep.binding]
//! timeout_ms = 5000
//! clock_skew_secs = 1.0
//!
//! [pip]
//! enabled = true
//! mapping_file = "$CUSTOS_HOME/attributes.map"
//! cache_data_dir = "/var/cache/custos"
//! cache_timeout_secs = 28800
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Every flat key can be overridden as `PREFIX__SECTION__KEY`, e.g.
//! `CUSTOS__PEP__BINDING__TIMEOUT_MS=2000`.

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::{ConfigError, KeyOrigin};
pub use loader::ConfigLoader;
pub use schema::*;
