//! Attribute URI support
//!
//! Attributes are addressed by URI:
//!
//! - Namespace: `https://<authority>`
//! - Attribute name: `https://<authority>/attr/<name>`
//! - Attribute value: `https://<authority>/attr/<name>/value/<value>`
//!
//! The authority namespace (scheme plus authority) is case-insensitive and is
//! normalized to lowercase. Name and value are case-sensitive.
//!
//! # Example
//!
//! ```
//! use opentdf_authz::fqn::AttributeFqn;
//!
//! let fqn = AttributeFqn::parse_value("https://Example.com/attr/Classification/value/S")?;
//! assert_eq!(fqn.namespace(), "https://example.com");
//! assert_eq!(fqn.name(), "Classification");
//! assert_eq!(fqn.value(), Some("S"));
//! assert_eq!(fqn.name_uri(), "https://example.com/attr/Classification");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use thiserror::Error;

/// Attribute URI parsing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FqnError {
    #[error("attribute URI missing scheme separator: {uri}")]
    MissingScheme { uri: String },

    #[error("attribute URI missing required component '{component}': {uri}")]
    MissingComponent { component: &'static str, uri: String },

    #[error("attribute URI does not follow <namespace>/attr/<name>[/value/<value>]: {uri}")]
    MalformedPath { uri: String },
}

impl FqnError {
    /// Returns a stable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            FqnError::MissingScheme { .. } => "KAS_E_FQN_SCHEME",
            FqnError::MissingComponent { .. } => "KAS_E_FQN_COMPONENT_MISSING",
            FqnError::MalformedPath { .. } => "KAS_E_FQN_STRUCTURE",
        }
    }
}

/// Parsed attribute URI
///
/// `value` is `None` for attribute-name URIs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeFqn {
    namespace: String,
    name: String,
    value: Option<String>,
}

impl AttributeFqn {
    /// Parse an attribute-value URI (`<ns>/attr/<name>/value/<value>`)
    pub fn parse_value(uri: &str) -> Result<Self, FqnError> {
        let fqn = Self::parse(uri)?;
        if fqn.value.is_none() {
            return Err(FqnError::MissingComponent {
                component: "value",
                uri: uri.to_string(),
            });
        }
        Ok(fqn)
    }

    /// Parse an attribute-name URI (`<ns>/attr/<name>`)
    pub fn parse_name(uri: &str) -> Result<Self, FqnError> {
        let fqn = Self::parse(uri)?;
        if fqn.value.is_some() {
            return Err(FqnError::MalformedPath {
                uri: uri.to_string(),
            });
        }
        Ok(fqn)
    }

    /// Parse either form
    pub fn parse(uri: &str) -> Result<Self, FqnError> {
        let (scheme, rest) = uri.split_once("://").ok_or_else(|| FqnError::MissingScheme {
            uri: uri.to_string(),
        })?;
        if scheme.is_empty() || scheme.contains('/') {
            return Err(FqnError::MissingScheme {
                uri: uri.to_string(),
            });
        }

        let (authority, path) = rest.split_once('/').ok_or_else(|| FqnError::MalformedPath {
            uri: uri.to_string(),
        })?;
        if authority.is_empty() {
            return Err(FqnError::MissingComponent {
                component: "namespace",
                uri: uri.to_string(),
            });
        }

        let path = path.strip_prefix("attr/").ok_or_else(|| FqnError::MalformedPath {
            uri: uri.to_string(),
        })?;

        let segments: Vec<&str> = path.split('/').collect();
        let (name, value) = match segments.as_slice() {
            [name] => (*name, None),
            [name, "value", value] => (*name, Some(*value)),
            _ => {
                return Err(FqnError::MalformedPath {
                    uri: uri.to_string(),
                })
            }
        };

        if name.is_empty() {
            return Err(FqnError::MissingComponent {
                component: "name",
                uri: uri.to_string(),
            });
        }
        if value.is_some_and(str::is_empty) {
            return Err(FqnError::MissingComponent {
                component: "value",
                uri: uri.to_string(),
            });
        }

        Ok(Self {
            namespace: format!("{}://{}", scheme, authority).to_lowercase(),
            name: name.to_string(),
            value: value.map(str::to_string),
        })
    }

    /// Build a value URI from components
    pub fn with_value(namespace: &str, name: &str, value: &str) -> Self {
        Self {
            namespace: namespace.trim_end_matches('/').to_lowercase(),
            name: name.to_string(),
            value: Some(value.to_string()),
        }
    }

    /// Build a name URI from components
    pub fn attribute(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.trim_end_matches('/').to_lowercase(),
            name: name.to_string(),
            value: None,
        }
    }

    /// Authority namespace, e.g. `https://example.com`
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// URI of the attribute name this FQN belongs to
    pub fn name_uri(&self) -> String {
        format!("{}/attr/{}", self.namespace, self.name)
    }

    /// Canonical URI (value URI when a value is present)
    pub fn uri(&self) -> String {
        match &self.value {
            Some(value) => format!("{}/attr/{}/value/{}", self.namespace, self.name, value),
            None => self.name_uri(),
        }
    }

    /// The attribute-name FQN for this value
    pub fn to_name(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            value: None,
        }
    }
}

impl fmt::Display for AttributeFqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl std::str::FromStr for AttributeFqn {
    type Err = FqnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_uri() {
        let fqn = AttributeFqn::parse_value("https://ex.com/attr/COI/value/PRX").unwrap();
        assert_eq!(fqn.namespace(), "https://ex.com");
        assert_eq!(fqn.name(), "COI");
        assert_eq!(fqn.value(), Some("PRX"));
        assert_eq!(fqn.uri(), "https://ex.com/attr/COI/value/PRX");
    }

    #[test]
    fn test_namespace_case_insensitive() {
        let a = AttributeFqn::parse("HTTPS://EX.com/attr/Rel/value/USA").unwrap();
        let b = AttributeFqn::parse("https://ex.com/attr/Rel/value/USA").unwrap();
        assert_eq!(a, b);

        // Name and value stay case-sensitive
        let c = AttributeFqn::parse("https://ex.com/attr/rel/value/USA").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_parse_name_uri() {
        let fqn = AttributeFqn::parse_name("https://ex.com/attr/Classification").unwrap();
        assert_eq!(fqn.value(), None);
        assert_eq!(fqn.name_uri(), "https://ex.com/attr/Classification");

        assert!(AttributeFqn::parse_name("https://ex.com/attr/C/value/S").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "ex.com/attr/a/value/b",
            "https://ex.com/a/value/b",
            "https://ex.com/attr//value/b",
            "https://ex.com/attr/a/value/",
            "https://ex.com/attr/a/value/b/c",
            "https:///attr/a/value/b",
            "https://ex.com/attr/a/other/b",
        ] {
            assert!(AttributeFqn::parse_value(bad).is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn test_value_uri_requires_value() {
        let err = AttributeFqn::parse_value("https://ex.com/attr/a").unwrap_err();
        assert!(matches!(
            err,
            FqnError::MissingComponent {
                component: "value",
                ..
            }
        ));
    }
}
