//! Validated provider identifiers.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum length of a provider name.
const MAX_LEN: usize = 63;

/// A validated provider name.
///
/// Provider names are lowercase ASCII: the first character is a letter or
/// digit, the rest letters, digits, `_`, or `-`, at most 63 characters
/// total. Every request path segment and every row keyed by provider uses
/// this form, so validation happens exactly once, at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ProviderName(String);

impl ProviderName {
    /// Parse and validate a provider name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidProviderName`] if the name is empty,
    /// too long, or contains characters outside `[a-z0-9_-]`.
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        if Self::is_valid(name) {
            Ok(Self(name.to_owned()))
        } else {
            Err(CoreError::InvalidProviderName {
                name: name.to_owned(),
            })
        }
    }

    /// Check whether a string is a well-formed provider name.
    #[must_use]
    pub fn is_valid(name: &str) -> bool {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        if name.len() > MAX_LEN {
            return false;
        }
        if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
            return false;
        }
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProviderName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ProviderName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for ProviderName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["openai", "anthropic", "my-proxy", "llama_local", "0ai", "a"] {
            assert!(ProviderName::is_valid(name), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "OpenAI", "-lead", "_lead", "has space", "sl/ash", "ünïcode"] {
            assert!(!ProviderName::is_valid(name), "{name} should be invalid");
        }
    }

    #[test]
    fn test_max_length() {
        let ok = "a".repeat(63);
        let too_long = "a".repeat(64);
        assert!(ProviderName::is_valid(&ok));
        assert!(!ProviderName::is_valid(&too_long));
    }

    #[test]
    fn test_parse_round_trip() {
        let name = ProviderName::parse("openrouter").unwrap();
        assert_eq!(name.as_str(), "openrouter");
        assert_eq!(name.to_string(), "openrouter");
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        let result: Result<ProviderName, _> = serde_json::from_str("\"Not Valid\"");
        assert!(result.is_err());
    }
}
