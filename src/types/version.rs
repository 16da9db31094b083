//! Environment version newtype.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A semver-like environment version string ("v2.6.0", "2.5.99-dev1").
///
/// Not strictly validated: anything the index publishes is accepted, but
/// versions that do parse as semver order numerically rather than
/// lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvVersion(String);

impl EnvVersion {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lenient semver view, tolerating a leading `v`.
    fn semver_key(&self) -> Option<semver::Version> {
        semver::Version::parse(self.0.trim_start_matches('v')).ok()
    }
}

impl Ord for EnvVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.semver_key(), other.semver_key()) {
            // Distinct spellings of the same semver ("v1.0.0" vs
            // "1.0.0") still need a total order consistent with Eq.
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            // Parseable versions sort above unparseable ones.
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for EnvVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EnvVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EnvVersion {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EnvVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EnvVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semver_ordering() {
        assert!(EnvVersion::new("2.10.0") > EnvVersion::new("2.9.1"));
        assert!(EnvVersion::new("v2.6.0") > EnvVersion::new("2.5.99"));
    }

    #[test]
    fn test_equal_semver_distinct_spelling_not_equal() {
        let prefixed = EnvVersion::new("v1.0.0");
        let bare = EnvVersion::new("1.0.0");
        assert_ne!(prefixed, bare);
        assert_ne!(prefixed.cmp(&bare), Ordering::Equal);
        // Antisymmetric, so both fit in one ordered collection.
        assert_eq!(prefixed.cmp(&bare), bare.cmp(&prefixed).reverse());
        let set: std::collections::BTreeSet<_> = [prefixed, bare].into();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_unparseable_sorts_below() {
        assert!(EnvVersion::new("1.0.0") > EnvVersion::new("nightly"));
    }

    #[test]
    fn test_descending_sort() {
        let mut versions = vec![
            EnvVersion::new("2.4.0"),
            EnvVersion::new("2.6.0"),
            EnvVersion::new("2.5.0"),
        ];
        versions.sort_by(|a, b| b.cmp(a));
        assert_eq!(versions[0].as_str(), "2.6.0");
        assert_eq!(versions[2].as_str(), "2.4.0");
    }
}
