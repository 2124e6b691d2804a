// src/version.rs

//! Version specs for dependency declarations
//!
//! Recipes declare dependencies with one of four spec forms:
//!
//! - `==1.2.3` exact match
//! - `>=1.2.3` at-least
//! - `~>1.2.3` pessimistic: allows the last given component to float
//!   (`~>1.2.3` matches `1.2.x >= 1.2.3` but not `1.3.0`)
//! - `*` any version
//!
//! A bare version string is treated as exact. The underlying ordered version
//! type is [`semver::Version`].

use crate::error::{Error, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A predicate over [`semver::Version`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionSpec {
    Any,
    Exact(Version),
    AtLeast(Version),
    /// `~>` with the number of components the author wrote (2 or 3)
    Compatible(Version, usize),
}

impl VersionSpec {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "*" {
            return Ok(VersionSpec::Any);
        }
        if let Some(rest) = s.strip_prefix("~>") {
            let rest = rest.trim();
            let components = rest.split('.').count();
            if !(2..=3).contains(&components) {
                return Err(Error::InvalidVersionSpec(s.to_string()));
            }
            let v = parse_loose(rest)?;
            return Ok(VersionSpec::Compatible(v, components));
        }
        if let Some(rest) = s.strip_prefix(">=") {
            return Ok(VersionSpec::AtLeast(parse_loose(rest.trim())?));
        }
        if let Some(rest) = s.strip_prefix("==") {
            return Ok(VersionSpec::Exact(parse_loose(rest.trim())?));
        }
        // bare version
        Ok(VersionSpec::Exact(parse_loose(s)?))
    }

    pub fn matches(&self, v: &Version) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Exact(want) => v == want,
            VersionSpec::AtLeast(min) => v >= min,
            VersionSpec::Compatible(min, components) => {
                if v < min {
                    return false;
                }
                // the last written component floats, everything above is pinned
                match components {
                    2 => v.major == min.major,
                    _ => v.major == min.major && v.minor == min.minor,
                }
            }
        }
    }
}

/// Accepts `1.2` as `1.2.0` in addition to full semver.
fn parse_loose(s: &str) -> Result<Version> {
    if let Ok(v) = Version::parse(s) {
        return Ok(v);
    }
    let padded = match s.split('.').count() {
        1 => format!("{s}.0.0"),
        2 => format!("{s}.0"),
        _ => s.to_string(),
    };
    Version::parse(&padded).map_err(|_| Error::InvalidVersion(s.to_string()))
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Any => write!(f, "*"),
            VersionSpec::Exact(v) => write!(f, "=={v}"),
            VersionSpec::AtLeast(v) => write!(f, ">={v}"),
            VersionSpec::Compatible(v, 2) => write!(f, "~>{}.{}", v.major, v.minor),
            VersionSpec::Compatible(v, _) => write!(f, "~>{}.{}.{}", v.major, v.minor, v.patch),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VersionSpec::parse(s)
    }
}

impl Serialize for VersionSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VersionSpec::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Highest version in `candidates` matching every spec in `specs`.
pub fn highest_matching<'a>(
    candidates: impl IntoIterator<Item = &'a Version>,
    specs: &[VersionSpec],
) -> Option<&'a Version> {
    candidates
        .into_iter()
        .filter(|v| specs.iter().all(|s| s.matches(v)))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_any_matches_all() {
        let spec = VersionSpec::parse("*").unwrap();
        for s in ["0.0.1", "1.2.3", "99.0.0-beta.1"] {
            assert!(spec.matches(&v(s)), "{s}");
        }
    }

    #[test]
    fn test_exact() {
        let spec = VersionSpec::parse("==1.2.3").unwrap();
        assert!(spec.matches(&v("1.2.3")));
        assert!(!spec.matches(&v("1.2.4")));

        // bare version is exact
        let bare = VersionSpec::parse("1.2.3").unwrap();
        assert_eq!(bare, spec);
    }

    #[test]
    fn test_at_least() {
        let spec = VersionSpec::parse(">=1.2.0").unwrap();
        assert!(spec.matches(&v("1.2.0")));
        assert!(spec.matches(&v("2.0.0")));
        assert!(!spec.matches(&v("1.1.9")));
    }

    #[test]
    fn test_pessimistic_three_components() {
        let spec = VersionSpec::parse("~>2.0.0").unwrap();
        assert!(spec.matches(&v("2.0.0")));
        assert!(spec.matches(&v("2.0.1")));
        assert!(!spec.matches(&v("2.1.0")));
        assert!(!spec.matches(&v("1.9.9")));
    }

    #[test]
    fn test_pessimistic_two_components() {
        let spec = VersionSpec::parse("~>1.2").unwrap();
        assert!(spec.matches(&v("1.2.0")));
        assert!(spec.matches(&v("1.9.0")));
        assert!(!spec.matches(&v("2.0.0")));
    }

    #[test]
    fn test_round_trip_display() {
        for s in ["*", "==1.2.3", ">=1.2.3", "~>2.0.0", "~>1.2"] {
            let spec = VersionSpec::parse(s).unwrap();
            assert_eq!(spec.to_string(), s);
            assert_eq!(VersionSpec::parse(&spec.to_string()).unwrap(), spec);
        }
    }

    #[test]
    fn test_highest_matching() {
        let versions: Vec<Version> = ["2.0.0", "2.0.1", "2.1.0"].iter().map(|s| v(s)).collect();
        let specs = vec![VersionSpec::parse("~>2.0.0").unwrap()];
        assert_eq!(highest_matching(&versions, &specs), Some(&v("2.0.1")));

        let none = vec![VersionSpec::parse(">=3.0.0").unwrap()];
        assert_eq!(highest_matching(&versions, &none), None);
    }
}
