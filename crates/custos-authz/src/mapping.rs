//! Attribute ID to Attribute Authority routing.
//!
//! The mapping file is line oriented:
//!
//! ```text
//! # attribute id, authority endpoint
//! urn:role,https://authority.example/aa
//! urn:email, $AA_BASE/attributes
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. `$VAR` and `${VAR}`
//! references are expanded from the environment; unknown variables are left
//! as written. A malformed line rejects the whole file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{AuthzError, AuthzResult};

const FIELD_SEPARATOR: char = ',';

/// Immutable table routing attribute IDs to authority endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeAuthorityMap {
    entries: HashMap<String, String>,
}

impl AttributeAuthorityMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint of the authority answering `attribute_id`.
    pub fn endpoint_for(&self, attribute_id: &str) -> Option<&str> {
        self.entries.get(attribute_id).map(String::as_str)
    }

    /// Number of mapped attributes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no attribute is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(attribute_id, endpoint)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for AttributeAuthorityMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Loads an [`AttributeAuthorityMap`] from mapping text.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingLoader;

impl MappingLoader {
    /// Read and parse a mapping file. Environment references in `path` are
    /// expanded first.
    pub fn from_file(path: impl AsRef<Path>) -> AuthzResult<AttributeAuthorityMap> {
        let raw = path.as_ref().to_string_lossy();
        let expanded = expand_env(&raw);
        let content = fs::read_to_string(&expanded).map_err(|e| {
            AuthzError::config(format!("failed to read mapping file {expanded}: {e}"))
        })?;

        let map = Self::parse(&content)
            .map_err(|e| AuthzError::config(format!("{expanded}: {e}")))?;
        debug!(path = %expanded, attributes = map.len(), "loaded attribute authority mapping");
        Ok(map)
    }

    /// Parse mapping text.
    ///
    /// A later line for the same attribute ID replaces an earlier one.
    pub fn parse(content: &str) -> AuthzResult<AttributeAuthorityMap> {
        let mut entries = HashMap::new();

        for (index, raw) in content.lines().enumerate() {
            let line = expand_env(raw);
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (attribute_id, endpoint) = split_line(line).ok_or_else(|| {
                AuthzError::config(format!(
                    "line {}: expected '<attribute id>,<authority uri>', got {line:?}",
                    index + 1
                ))
            })?;
            entries.insert(attribute_id.to_string(), endpoint.to_string());
        }

        Ok(AttributeAuthorityMap { entries })
    }
}

fn split_line(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split(FIELD_SEPARATOR);
    let attribute_id = fields.next()?.trim();
    let endpoint = fields.next()?.trim();
    if fields.next().is_some() || attribute_id.is_empty() || endpoint.is_empty() {
        return None;
    }
    Some((attribute_id, endpoint))
}

/// Expand `$VAR` and `${VAR}` from the process environment.
///
/// Unset variables and malformed references are copied through unchanged.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}
