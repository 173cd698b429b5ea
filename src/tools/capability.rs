//! Compiled capability patterns.
//!
//! A pattern is a literal prefix plus an optional single trailing `*`.
//! `iam:*` matches `iam:CreateUser`; `read.list` matches only `read.list`.
//! Patterns are parsed once when a tool is admitted and reused for every call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed capability pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityPattern {
    prefix: String,
    wildcard: bool,
}

impl CapabilityPattern {
    /// Parse and shape-check a pattern.
    ///
    /// Rules: non-empty; `.`-separated segments are non-empty; `*` may only
    /// appear once, as the final character.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Err("capability cannot be empty".to_string());
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(format!("capability '{}' contains whitespace", raw));
        }

        let (prefix, wildcard) = match raw.strip_suffix('*') {
            Some(prefix) => (prefix, true),
            None => (raw, false),
        };
        if prefix.contains('*') {
            return Err(format!(
                "capability '{}' may only use '*' as a single trailing wildcard",
                raw
            ));
        }

        // A trailing separator before the wildcard (`s3.*`) is fine; any other
        // empty segment is not.
        let body = if wildcard {
            prefix.strip_suffix('.').unwrap_or(prefix)
        } else {
            prefix
        };
        if body.is_empty() {
            // Only the bare `*` has no literal part.
            if !(wildcard && prefix.is_empty()) {
                return Err(format!("capability '{}' has an empty segment", raw));
            }
        } else if body.split('.').any(str::is_empty) {
            return Err(format!("capability '{}' has an empty segment", raw));
        }

        Ok(Self {
            prefix: prefix.to_string(),
            wildcard,
        })
    }

    /// Whether `capability` is covered by this pattern.
    pub fn matches(&self, capability: &str) -> bool {
        if self.wildcard {
            capability.starts_with(&self.prefix)
        } else {
            capability == self.prefix
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Display for CapabilityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wildcard {
            write!(f, "{}*", self.prefix)
        } else {
            f.write_str(&self.prefix)
        }
    }
}

impl TryFrom<String> for CapabilityPattern {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CapabilityPattern> for String {
    fn from(pattern: CapabilityPattern) -> Self {
        pattern.to_string()
    }
}

/// First pattern in `patterns` that covers `capability`.
pub fn first_match<'a>(
    patterns: &'a [CapabilityPattern],
    capability: &str,
) -> Option<&'a CapabilityPattern> {
    patterns.iter().find(|p| p.matches(capability))
}
