// src/profile/options.rs

//! Typed build options
//!
//! Options are named booleans, integers or strings a recipe declares and a
//! user overrides. A name containing `/` namespaces the option to a
//! dependency: `zlib/shared` is the `shared` option of the `zlib` package.
//! Option files serialize as JSON with sorted keys so the canonical form is
//! stable for hashing.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single option value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl OptionValue {
    /// Parse a CLI-supplied value: `true`/`false`, integer, else string.
    pub fn parse(s: &str) -> OptionValue {
        match s {
            "true" => OptionValue::Bool(true),
            "false" => OptionValue::Bool(false),
            _ => match s.parse::<i64>() {
                Ok(i) => OptionValue::Int(i),
                Err(_) => OptionValue::Str(s.to_string()),
            },
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Int(i) => write!(f, "{i}"),
            OptionValue::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Named option values, `[pkg/]key` convention
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionSet(pub BTreeMap<String, OptionValue>);

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: &str, value: OptionValue) {
        self.0.insert(name.to_string(), value);
    }

    /// Parse a `key=value` CLI argument into this set.
    pub fn set_from_arg(&mut self, arg: &str) -> Result<()> {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| Error::InvalidOption(format!("expected key=value, got `{arg}`")))?;
        if key.is_empty() {
            return Err(Error::InvalidOption(format!("empty option name in `{arg}`")));
        }
        self.set(key, OptionValue::parse(value));
        Ok(())
    }

    /// Options not namespaced to any dependency.
    pub fn for_root(&self) -> OptionSet {
        OptionSet(
            self.0
                .iter()
                .filter(|(k, _)| !k.contains('/'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Options namespaced to `name`, with the prefix stripped.
    pub fn for_dependency(&self, name: &str) -> OptionSet {
        let prefix = format!("{name}/");
        OptionSet(
            self.0
                .iter()
                .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone())))
                .collect(),
        )
    }

    /// All namespaced options grouped by dependency name.
    pub fn for_dependencies(&self) -> BTreeMap<String, OptionSet> {
        let mut out: BTreeMap<String, OptionSet> = BTreeMap::new();
        for (k, v) in &self.0 {
            if let Some((pkg, opt)) = k.split_once('/') {
                out.entry(pkg.to_string())
                    .or_default()
                    .set(opt, v.clone());
            }
        }
        out
    }

    /// Everything except options namespaced to `name`.
    pub fn not_for(&self, name: &str) -> OptionSet {
        let prefix = format!("{name}/");
        OptionSet(
            self.0
                .iter()
                .filter(|(k, _)| !k.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Merge `other` in, `other` winning on shared keys.
    pub fn merge(&mut self, other: &OptionSet) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Union keeping `self` on shared keys.
    pub fn union_(&self, other: &OptionSet) -> OptionSet {
        let mut out = other.clone();
        out.merge(self);
        out
    }

    /// Keys present in both sets with different values.
    pub fn conflicts(&self, other: &OptionSet) -> Vec<String> {
        let keys: BTreeSet<&String> = self.0.keys().collect();
        keys.into_iter()
            .filter(|k| other.0.get(*k).is_some_and(|v| v != &self.0[*k]))
            .cloned()
            .collect()
    }

    /// Canonical JSON: BTreeMap keys are already sorted, so this is stable.
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(self).expect("option values always serialize")
    }
}

impl FromIterator<(String, OptionValue)> for OptionSet {
    fn from_iter<I: IntoIterator<Item = (String, OptionValue)>>(iter: I) -> Self {
        OptionSet(iter.into_iter().collect())
    }
}
