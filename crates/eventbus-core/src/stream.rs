//! Stream names, stream patterns and event type names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Longest accepted stream name, matching the `VARCHAR(255)` column.
pub const MAX_STREAM_NAME_LEN: usize = 255;

/// A validated stream name (`[a-zA-Z0-9_-]+`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamName(String);

impl StreamName {
    /// Parses and validates a stream name.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidStreamName` if the name is empty, too long,
    /// or contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, BusError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= MAX_STREAM_NAME_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid {
            Ok(Self(name))
        } else {
            Err(BusError::InvalidStreamName(name))
        }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StreamName {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamName> for String {
    fn from(value: StreamName) -> Self {
        value.0
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A glob over stream names. `*` matches any run of characters, `?` matches
/// exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamPattern(String);

impl StreamPattern {
    /// Parses a stream pattern.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidSubscription` if the pattern is empty or
    /// contains characters that can never occur in a stream name.
    pub fn new(pattern: impl Into<String>) -> Result<Self, BusError> {
        let pattern = pattern.into();
        let valid = !pattern.is_empty()
            && pattern.bytes().all(|b| {
                b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'*' | b'?')
            });
        if valid {
            Ok(Self(pattern))
        } else {
            Err(BusError::InvalidSubscription(format!(
                "invalid stream pattern {pattern:?}"
            )))
        }
    }

    /// Returns the raw pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if `stream_name` matches this pattern.
    #[must_use]
    pub fn matches(&self, stream_name: &str) -> bool {
        glob_match(self.0.as_bytes(), stream_name.as_bytes())
    }
}

impl TryFrom<String> for StreamPattern {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamPattern> for String {
    fn from(value: StreamPattern) -> Self {
        value.0
    }
}

impl fmt::Display for StreamPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns `true` if `name` matches any of `patterns`, or if `patterns` is
/// empty.
#[must_use]
pub fn matches_any(patterns: &[StreamPattern], name: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| p.matches(name))
}

// Iterative wildcard match with single-star backtracking.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}

/// Validates a PascalCase-like event type name (`[A-Z][A-Za-z0-9]*`).
///
/// # Errors
///
/// Returns `BusError::Validation` if the name does not conform.
pub fn validate_event_type(event_type: &str) -> Result<(), BusError> {
    let mut bytes = event_type.bytes();
    let valid = matches!(bytes.next(), Some(b'A'..=b'Z'))
        && bytes.all(|b| b.is_ascii_alphanumeric())
        && event_type.len() <= 255;
    if valid {
        Ok(())
    } else {
        Err(BusError::Validation(format!(
            "event type {event_type:?} must match [A-Z][A-Za-z0-9]*"
        )))
    }
}
