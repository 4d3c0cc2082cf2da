//! Configuration error types.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Where a flat `section.key` setting came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOrigin {
    /// A pair passed to [`ConfigLoader::with_pairs`](crate::ConfigLoader::with_pairs).
    Pair,
    /// The named environment variable.
    Env(String),
}

impl fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pair => f.write_str("configuration pair"),
            Self::Env(var) => write!(f, "environment variable {var}"),
        }
    }
}

/// Errors raised while loading or validating a [`CustosConfig`](crate::CustosConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {}", .path.display())]
    FileNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The configuration file exists but could not be read.
    #[error("cannot read configuration file {}", .path.display())]
    Unreadable {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration text in a format other than TOML or JSON.
    #[error("unsupported configuration format: {format}")]
    UnsupportedFormat {
        /// The format name or file path that was given.
        format: String,
    },

    /// Malformed TOML, or a TOML table with fields outside the schema.
    #[error("malformed TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed JSON, or a JSON object with fields outside the schema.
    #[error("malformed JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A `.env` file exists but could not be parsed.
    #[error("cannot load .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    /// A flat key outside the schema.
    #[error("unknown configuration key {key} in {origin}")]
    UnknownKey {
        /// The dotted key.
        key: String,
        /// Where the key came from.
        origin: KeyOrigin,
    },

    /// A flat key naming the query subject, which always comes from the
    /// request being enforced.
    #[error("{key} in {origin} cannot be configured, the query subject comes from each request")]
    SubjectKey {
        /// The dotted key.
        key: String,
        /// Where the key came from.
        origin: KeyOrigin,
    },

    /// A flat value that does not parse for its key.
    #[error("bad value for {key} in {origin}: {expected}")]
    BadValue {
        /// The dotted key.
        key: String,
        /// Where the key came from.
        origin: KeyOrigin,
        /// What the key accepts.
        expected: &'static str,
    },

    /// A setting the enabled features require is empty.
    #[error("missing required configuration field: {field}")]
    MissingField {
        /// The dotted field name.
        field: String,
    },

    /// A loaded setting that fails validation.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The dotted field name.
        field: String,
        /// Why the value is rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Create a missing file error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create an unreadable file error.
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.into(),
            source,
        }
    }

    /// Create an unsupported format error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// The dotted key this error is about, for flat key and validation
    /// errors.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::UnknownKey { key, .. }
            | Self::SubjectKey { key, .. }
            | Self::BadValue { key, .. } => Some(key),
            Self::MissingField { field } | Self::InvalidValue { field, .. } => Some(field),
            _ => None,
        }
    }
}
