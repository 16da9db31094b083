//! SHA-512 digest newtype.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Newtype for an expected SHA-512 digest (128 hex characters).
///
/// Stored lowercased so comparison against a computed digest is
/// case-insensitive. Index data is accepted unvalidated; use
/// [`Sha512Digest::validated`] where strictness matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String")]
pub struct Sha512Digest(String);

impl Sha512Digest {
    /// Create a digest without validation (for index/deserialized data).
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_ascii_lowercase())
    }

    /// Create a validated digest (exactly 128 hex characters).
    pub fn validated(s: &str) -> Result<Self, String> {
        if s.len() == 128 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self::new(s))
        } else {
            Err(format!(
                "Invalid SHA-512 digest: expected 128 hex chars, got '{s}'"
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Case-insensitive comparison against a computed hex digest.
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.0 == actual_hex.to_ascii_lowercase()
    }
}

impl fmt::Display for Sha512Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Sha512Digest {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Sha512Digest {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Sha512Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
