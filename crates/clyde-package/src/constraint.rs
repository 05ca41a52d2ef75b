//! Version constraint parsing and matching

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version constraint attached to a dependency
///
/// A closed set of constraint shapes; every comparison goes through
/// [`VersionConstraint::satisfies`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionConstraint {
    /// `=1.2.3` or a bare full version
    Exact(Version),
    /// `^1.2.3`
    Caret(Version),
    /// `~1.2.3`
    Tilde(Version),
    /// Comparator list such as `>=1.2.0 <2.0.0` or a partial version `1.2`
    Range(VersionReq),
    /// `*`
    #[default]
    Wildcard,
}

/// Error produced when a constraint string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version constraint '{input}': {reason}")]
pub struct ConstraintError {
    pub input: String,
    pub reason: String,
}

impl ConstraintError {
    fn new(input: &str, reason: impl ToString) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl VersionConstraint {
    /// Parse version constraint from string
    pub fn parse(s: &str) -> Result<Self, ConstraintError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(VersionConstraint::Wildcard);
        }

        // "^1.2" has no full version and is left to the range parser
        let full_version = |v: &str| Version::parse(v.trim()).ok();

        if let Some(version) = trimmed.strip_prefix('^').and_then(full_version) {
            return Ok(VersionConstraint::Caret(version));
        }
        if let Some(version) = trimmed.strip_prefix('~').and_then(full_version) {
            return Ok(VersionConstraint::Tilde(version));
        }
        if let Some(version) = trimmed.strip_prefix('=').and_then(full_version) {
            return Ok(VersionConstraint::Exact(version));
        }

        if let Ok(version) = Version::parse(trimmed) {
            return Ok(VersionConstraint::Exact(version));
        }

        // ">=1.2.0 <2.0.0" is accepted alongside the comma separated form
        let normalized = normalize_comparators(trimmed);
        VersionReq::parse(&normalized)
            .map(VersionConstraint::Range)
            .map_err(|e| ConstraintError::new(s, e))
    }

    /// Check if version satisfies constraint
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::Range(req) => req.matches(version),
            VersionConstraint::Caret(v) => {
                if !prerelease_allowed(version, v) {
                    return false;
                }
                if version < v {
                    return false;
                }
                if v.major > 0 {
                    version.major == v.major
                } else if v.minor > 0 {
                    version.major == 0 && version.minor == v.minor
                } else {
                    version.major == 0 && version.minor == 0 && version.patch == v.patch
                }
            }
            VersionConstraint::Tilde(v) => {
                prerelease_allowed(version, v)
                    && version >= v
                    && version.major == v.major
                    && version.minor == v.minor
            }
            VersionConstraint::Wildcard => version.pre.is_empty(),
        }
    }

    /// Whether this constraint accepts any release version
    pub fn is_wildcard(&self) -> bool {
        matches!(self, VersionConstraint::Wildcard)
    }
}

/// Prerelease versions only match when the constraint itself names a prerelease
fn prerelease_allowed(version: &Version, base: &Version) -> bool {
    version.pre.is_empty() || !base.pre.is_empty()
}

/// Turn whitespace separated comparators into the comma separated form
fn normalize_comparators(input: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for token in input.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        // "> = 1.0" style splits leave a bare operator followed by its version
        match parts.last_mut() {
            Some(last) if last.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) => {
                last.push_str(token);
            }
            _ => parts.push(token.to_string()),
        }
    }
    parts.join(", ")
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Exact(v) => write!(f, "={}", v),
            VersionConstraint::Caret(v) => write!(f, "^{}", v),
            VersionConstraint::Tilde(v) => write!(f, "~{}", v),
            VersionConstraint::Range(req) => write!(f, "{}", req),
            VersionConstraint::Wildcard => write!(f, "*"),
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionConstraint {
    type Error = ConstraintError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionConstraint> for String {
    fn from(constraint: VersionConstraint) -> Self {
        constraint.to_string()
    }
}
