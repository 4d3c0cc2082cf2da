//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, flat key/value pairs, and environment
//! variables.

use std::env;
use std::fs;
use std::path::Path;

use crate::{BindingConfig, ConfigError, CustosConfig, KeyOrigin, LogFormat, QueryConfig};

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON), replacing the defaults
/// 3. Flat dotted key/value pairs such as `pep.cache_decisions = true`
/// 4. Environment variables
///
/// Flat keys follow a fixed schema. Unknown keys are rejected, and so is any
/// attempt to configure the query subject, which is always taken from the
/// request.
///
/// # Example
///
/// ```no_run
/// use custos_config::ConfigLoader;
///
/// # fn main() -> Result<(), custos_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("custos.toml")?
///     .with_pairs([("pep.cache_decisions", "true")])?
///     .with_env_prefix("CUSTOS")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: CustosConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CustosConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with development preset configuration.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = CustosConfig::development();
        self
    }

    /// Start with production preset configuration.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = CustosConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (.toml) and JSON (.json) formats, chosen by extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file does not exist, cannot be read,
    /// contains invalid TOML/JSON, or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::unreadable(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in `format` ("toml" or "json").
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use custos_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [pep]
    ///     authz_service_uri = "https://authz.example/decision"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.pep.authz_service_uri, "https://authz.example/decision");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => return Err(ConfigError::unsupported_format(format)),
        };
        Ok(self)
    }

    /// Apply flat dotted key/value pairs.
    ///
    /// Values are strings and are parsed according to the target field.
    /// `pep.ignore_patterns` takes one pattern per line.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownKey` for a key outside the schema,
    /// `ConfigError::SubjectKey` for `*.query.subject_id` and
    /// `ConfigError::BadValue` for a value that does not parse.
    ///
    /// # Example
    ///
    /// ```
    /// use custos_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_pairs([
    ///         ("pep.authz_service_uri", "https://authz.example/decision"),
    ///         ("pep.ignore_patterns", "^/static/\n^/favicon.ico"),
    ///         ("pep.binding.timeout_ms", "2500"),
    ///     ])
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.pep.ignore_patterns.len(), 2);
    /// assert_eq!(config.pep.binding.timeout_ms, 2500);
    /// ```
    pub fn with_pairs<I, K, V>(mut self, pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in pairs {
            let key = key.as_ref().trim();
            apply_key(&mut self.config, key, value.as_ref())
                .map_err(|e| e.into_config_error(key, KeyOrigin::Pair))?;
        }
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`, which
    /// maps to the flat key `section.key`. For example, with prefix
    /// "CUSTOS":
    /// - `CUSTOS__PEP__CACHE_DECISIONS=true`
    /// - `CUSTOS__PIP__QUERY__ISSUER_NAME=gateway`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if there is one.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `.env` file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Finalize and return the loaded configuration.
    ///
    /// Applies environment variable overrides (if a prefix was set) and
    /// validates the final configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if environment variable parsing or validation
    /// fails.
    pub fn load(mut self) -> Result<CustosConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without validation.
    #[must_use]
    pub fn load_unvalidated(self) -> CustosConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<CustosConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::unsupported_format(path.display().to_string())),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        let mut vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with(&marker))
            .collect();
        vars.sort();

        for (var, value) in vars {
            let key = var[marker.len()..]
                .split("__")
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join(".");

            apply_key(&mut self.config, &key, &value)
                .map_err(|e| e.into_config_error(&key, KeyOrigin::Env(var)))?;
        }

        Ok(())
    }
}

enum KeyError {
    Unknown,
    Subject,
    Invalid(&'static str),
}

impl KeyError {
    fn into_config_error(self, key: &str, origin: KeyOrigin) -> ConfigError {
        let key = key.to_string();
        match self {
            Self::Unknown => ConfigError::UnknownKey { key, origin },
            Self::Subject => ConfigError::SubjectKey { key, origin },
            Self::Invalid(expected) => ConfigError::BadValue {
                key,
                origin,
                expected,
            },
        }
    }
}

fn apply_key(config: &mut CustosConfig, key: &str, value: &str) -> Result<(), KeyError> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        // PEP section
        ["pep", "authz_service_uri"] => config.pep.authz_service_uri = value.trim().to_string(),
        ["pep", "cache_decisions"] => config.pep.cache_decisions = parse_bool(value)?,
        ["pep", "cache_denies"] => config.pep.cache_denies = parse_bool(value)?,
        ["pep", "ignore_patterns"] => config.pep.ignore_patterns = parse_lines(value),
        ["pep", "query", field] => apply_query(&mut config.pep.query, field, value)?,
        ["pep", "binding", field] => apply_binding(&mut config.pep.binding, field, value)?,

        // PIP section
        ["pip", "enabled"] => config.pip.enabled = parse_bool(value)?,
        ["pip", "mapping_file"] => config.pip.mapping_file = parse_optional(value),
        ["pip", "cache_sessions"] => config.pip.cache_sessions = parse_bool(value)?,
        ["pip", "cache_data_dir"] => config.pip.cache_data_dir = parse_optional(value),
        ["pip", "cache_timeout_secs"] => {
            config.pip.cache_timeout_secs = match parse_optional(value) {
                None => None,
                Some(secs) if secs.eq_ignore_ascii_case("none") => None,
                Some(secs) => Some(
                    secs.parse()
                        .map_err(|_| KeyError::Invalid("expected integer or 'none'"))?,
                ),
            };
        }
        ["pip", "query", field] => apply_query(&mut config.pip.query, field, value)?,
        ["pip", "binding", field] => apply_binding(&mut config.pip.binding, field, value)?,

        // Logging section
        ["logging", "enabled"] => config.logging.enabled = parse_bool(value)?,
        ["logging", "level"] => config.logging.level = value.trim().to_string(),
        ["logging", "format"] => {
            config.logging.format = match value.trim().to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => return Err(KeyError::Invalid("expected 'json' or 'pretty'")),
            };
        }

        // Metrics section
        ["metrics", "enabled"] => config.metrics.enabled = parse_bool(value)?,
        ["metrics", "addr"] => config.metrics.addr = value.trim().to_string(),

        _ => return Err(KeyError::Unknown),
    }

    Ok(())
}

fn apply_query(query: &mut QueryConfig, field: &str, value: &str) -> Result<(), KeyError> {
    let value = value.trim().to_string();
    match field {
        "issuer_name" => query.issuer_name = value,
        "issuer_format" => query.issuer_format = value,
        "subject_id_format" => query.subject_id_format = value,
        "action" => query.action = value,
        "subject_id" => return Err(KeyError::Subject),
        _ => return Err(KeyError::Unknown),
    }
    Ok(())
}

fn apply_binding(binding: &mut BindingConfig, field: &str, value: &str) -> Result<(), KeyError> {
    let value = value.trim();
    match field {
        "timeout_ms" => {
            binding.timeout_ms = value
                .parse()
                .map_err(|_| KeyError::Invalid("expected integer"))?;
        }
        "clock_skew_secs" => {
            binding.clock_skew_secs = value
                .parse()
                .map_err(|_| KeyError::Invalid("expected number of seconds"))?;
        }
        _ => return Err(KeyError::Unknown),
    }
    Ok(())
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Result<bool, KeyError> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(KeyError::Invalid("expected boolean")),
    }
}

fn parse_optional(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_lines(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const AUTHZ: &str = "https://authz.example/decision";

    fn base() -> ConfigLoader {
        ConfigLoader::new()
            .with_pairs([("pep.authz_service_uri", AUTHZ)])
            .unwrap()
    }

    #[test]
    fn test_defaults_need_authz_service() {
        assert!(matches!(
            ConfigLoader::new().load(),
            Err(ConfigError::MissingField { .. })
        ));
        assert_eq!(base().load().unwrap().pep.authz_service_uri, AUTHZ);
    }

    #[test]
    fn test_toml_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
            [pep]
            authz_service_uri = "{AUTHZ}"
            cache_decisions = true
            ignore_patterns = ["^/static/"]

            [pep.binding]
            timeout_ms = 2000

            [pip]
            enabled = true
            mapping_file = "/etc/custos/attributes.map"
            cache_timeout_secs = 3600
            "#
        )
        .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();

        assert!(config.pep.cache_decisions);
        assert_eq!(config.pep.ignore_patterns, vec!["^/static/"]);
        assert_eq!(config.pep.binding.timeout_ms, 2000);
        assert_eq!(config.pep.binding.clock_skew_secs, 1.0);
        assert_eq!(config.pip.cache_timeout_secs, Some(3600));
    }

    #[test]
    fn test_json_file() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, r#"{{"pep": {{"authz_service_uri": "{AUTHZ}", "cache_denies": false}}}}"#)
            .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert!(!config.pep.cache_denies);
    }

    #[test]
    fn test_unknown_file_field() {
        let result = ConfigLoader::new().with_string("[pep]\ncache_everything = true\n", "toml");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new().with_file("/nonexistent/custos.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
        assert!(ConfigLoader::new()
            .with_optional_file("/nonexistent/custos.toml")
            .is_ok());
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".ini").unwrap();
        let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));

        let err = ConfigLoader::new().with_string("pep = {}", "yaml").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { ref format } if format == "yaml"));
    }

    #[test]
    fn test_flat_pairs() {
        let config = base()
            .with_pairs([
                ("pep.cache_decisions", "yes"),
                ("pep.ignore_patterns", "^/static/\n\n  ^/favicon.ico  \n"),
                ("pep.query.issuer_name", "gateway"),
                ("pep.binding.clock_skew_secs", "2.5"),
                ("pip.enabled", "true"),
                ("pip.mapping_file", "/etc/custos/attributes.map"),
                ("pip.cache_data_dir", "/var/cache/custos"),
                ("pip.cache_timeout_secs", "none"),
                ("logging.format", "pretty"),
                ("metrics.enabled", "off"),
            ])
            .unwrap()
            .load()
            .unwrap();

        assert!(config.pep.cache_decisions);
        assert_eq!(config.pep.ignore_patterns, vec!["^/static/", "^/favicon.ico"]);
        assert_eq!(config.pep.query.issuer_name, "gateway");
        assert_eq!(config.pep.binding.clock_skew_secs, 2.5);
        assert_eq!(config.pip.cache_data_dir.as_deref(), Some("/var/cache/custos"));
        assert_eq!(config.pip.cache_timeout_secs, None);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_unknown_pair_rejected() {
        let err = base().with_pairs([("pep.cache_everything", "true")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownKey { ref key, origin: KeyOrigin::Pair } if key == "pep.cache_everything"
        ));
    }

    #[test]
    fn test_subject_id_rejected() {
        for key in ["pep.query.subject_id", "pip.query.subject_id"] {
            let err = base().with_pairs([(key, "alice")]).unwrap_err();
            assert!(matches!(err, ConfigError::SubjectKey { .. }), "{key} accepted");
            assert_eq!(err.key(), Some(key));
        }
    }

    #[test]
    fn test_invalid_pair_value() {
        let err = base().with_pairs([("pep.binding.timeout_ms", "soon")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::BadValue { ref key, expected: "expected integer", .. } if key == "pep.binding.timeout_ms"
        ));
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("CUSTOS_LOADER_ENV__PEP__CACHE_DECISIONS", "true");
        env::set_var("CUSTOS_LOADER_ENV__PIP__QUERY__ISSUER_NAME", "from-env");

        let config = base()
            .with_env_prefix("custos_loader_env")
            .load()
            .unwrap();

        env::remove_var("CUSTOS_LOADER_ENV__PEP__CACHE_DECISIONS");
        env::remove_var("CUSTOS_LOADER_ENV__PIP__QUERY__ISSUER_NAME");

        assert!(config.pep.cache_decisions);
        assert_eq!(config.pip.query.issuer_name, "from-env");
    }

    #[test]
    fn test_env_parse_error() {
        env::set_var("CUSTOS_LOADER_BAD__PEP__CACHE_DENIES", "maybe");
        let result = base().with_env_prefix("CUSTOS_LOADER_BAD").load();
        env::remove_var("CUSTOS_LOADER_BAD__PEP__CACHE_DENIES");

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::BadValue { origin: KeyOrigin::Env(ref var), .. }
                if var == "CUSTOS_LOADER_BAD__PEP__CACHE_DENIES"
        ));
        assert_eq!(err.key(), Some("pep.cache_denies"));
    }

    #[test]
    fn test_env_subject_id_rejected() {
        env::set_var("CUSTOS_LOADER_SUBJECT__PEP__QUERY__SUBJECT_ID", "alice");
        let result = base().with_env_prefix("CUSTOS_LOADER_SUBJECT").load();
        env::remove_var("CUSTOS_LOADER_SUBJECT__PEP__QUERY__SUBJECT_ID");

        assert!(matches!(
            result,
            Err(ConfigError::SubjectKey { ref key, origin: KeyOrigin::Env(_) }) if key == "pep.query.subject_id"
        ));
    }
}
