// src/services/system.rs

//! System package probe
//!
//! A native dependency can be satisfied by a system installation. The probe
//! asks pkg-config, which covers the library packages recipes typically
//! depend on; a missing pkg-config or an unknown module both read as "not
//! installed".

use crate::error::Result;
use semver::Version;
use std::process::Command;
use tracing::debug;

/// Version of a system-installed package, via `pkg-config --modversion`.
pub fn system_version(name: &str) -> Result<Option<Version>> {
    let output = match Command::new("pkg-config").arg("--modversion").arg(name).output() {
        Ok(out) => out,
        Err(_) => return Ok(None),
    };
    if !output.status.success() {
        return Ok(None);
    }
    let raw = String::from_utf8_lossy(&output.stdout);
    let raw = raw.trim();
    let parsed = parse_loose(raw);
    if parsed.is_none() {
        debug!("system package {name} reports unparseable version `{raw}`");
    }
    Ok(parsed)
}

/// pkg-config versions are not always full semver (`1.3`, `8.11.1`).
fn parse_loose(s: &str) -> Option<Version> {
    if let Ok(v) = Version::parse(s) {
        return Some(v);
    }
    let padded = match s.split('.').count() {
        1 => format!("{s}.0.0"),
        2 => format!("{s}.0"),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loose() {
        assert_eq!(parse_loose("1.3"), Some(Version::new(1, 3, 0)));
        assert_eq!(parse_loose("8"), Some(Version::new(8, 0, 0)));
        assert_eq!(parse_loose("1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(parse_loose("not-a-version"), None);
    }

    #[test]
    fn test_unknown_module_is_none() {
        // whatever the host has installed, this module does not exist
        let v = system_version("dop-test-no-such-module-xyzzy").unwrap();
        assert!(v.is_none());
    }
}
