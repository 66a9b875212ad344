//! Host facts: probed pieces of system state.
//!
//! A [`HostFacts`] snapshot is immutable once gathered. Newer observations
//! are layered on top with [`HostFacts::layered`], which produces a new
//! snapshot instead of mutating the old one.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::StepError;

use super::command::CommandSpec;

/// Identifies one observable piece of host state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FactKey {
    /// Whether a distribution package is installed.
    Package(String),
    /// Whether a system user exists.
    SystemUser(String),
    /// Whether a database role exists.
    DbRole(String),
    /// Whether a path exists.
    PathExists(PathBuf),
    /// Digest of a file's contents, absent when the file does not exist.
    FileDigest(PathBuf),
    /// Whether a systemd unit is enabled at boot.
    ServiceEnabled(String),
    /// Whether a systemd unit is running.
    ServiceActive(String),
    /// HTTP status of an endpoint, absent when unreachable.
    Endpoint(String),
    /// Whether a command exits successfully.
    CommandSucceeds(CommandSpec),
}

/// The observed value of a fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactValue {
    /// A yes/no observation.
    Flag(bool),
    /// A file digest, or `None` for a missing file.
    Digest(Option<String>),
    /// An HTTP status, or `None` when the endpoint did not answer.
    HttpStatus(Option<u16>),
}

/// A snapshot of probed host state.
#[derive(Debug, Clone)]
pub struct HostFacts {
    /// When the snapshot was taken.
    probed_at: DateTime<Utc>,
    /// Successfully probed facts.
    values: BTreeMap<FactKey, FactValue>,
    /// Facts that could not be probed, with the reason.
    failures: BTreeMap<FactKey, String>,
}

impl HostFacts {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            probed_at: Utc::now(),
            values: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    /// Builds a snapshot from probe results.
    #[must_use]
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = (FactKey, Result<FactValue, String>)>,
    {
        let mut facts = Self::new();
        for (key, result) in results {
            match result {
                Ok(value) => {
                    facts.values.insert(key, value);
                }
                Err(reason) => {
                    facts.failures.insert(key, reason);
                }
            }
        }
        facts
    }

    /// Returns a new snapshot with `newer` observations replacing ours.
    #[must_use]
    pub fn layered(&self, newer: &Self) -> Self {
        let mut values = self.values.clone();
        let mut failures = self.failures.clone();
        for (key, value) in &newer.values {
            failures.remove(key);
            values.insert(key.clone(), value.clone());
        }
        for (key, reason) in &newer.failures {
            values.remove(key);
            failures.insert(key.clone(), reason.clone());
        }
        Self {
            probed_at: newer.probed_at,
            values,
            failures,
        }
    }

    /// Looks up a fact.
    ///
    /// # Errors
    ///
    /// Returns a probe error if the fact failed to probe or was never probed.
    pub fn get(&self, key: &FactKey) -> Result<&FactValue, StepError> {
        if let Some(value) = self.values.get(key) {
            return Ok(value);
        }
        let message = self
            .failures
            .get(key)
            .cloned()
            .unwrap_or_else(|| String::from("fact was not probed"));
        Err(StepError::Probe {
            fact: key.to_string(),
            message,
        })
    }

    /// Returns when the snapshot was taken.
    #[must_use]
    pub const fn probed_at(&self) -> DateTime<Utc> {
        self.probed_at
    }

    /// Iterates over probed values.
    pub fn values(&self) -> impl Iterator<Item = (&FactKey, &FactValue)> {
        self.values.iter()
    }

    /// Iterates over probe failures.
    pub fn failures(&self) -> impl Iterator<Item = (&FactKey, &String)> {
        self.failures.iter()
    }

    /// Returns the number of facts, probed or failed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len() + self.failures.len()
    }

    /// Returns true if the snapshot holds no facts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.failures.is_empty()
    }
}

impl Default for HostFacts {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package(name) => write!(f, "package {name}"),
            Self::SystemUser(name) => write!(f, "system user {name}"),
            Self::DbRole(name) => write!(f, "database role {name}"),
            Self::PathExists(path) => write!(f, "path {}", path.display()),
            Self::FileDigest(path) => write!(f, "file {}", path.display()),
            Self::ServiceEnabled(unit) => write!(f, "{unit} enabled"),
            Self::ServiceActive(unit) => write!(f, "{unit} active"),
            Self::Endpoint(url) => write!(f, "endpoint {url}"),
            Self::CommandSucceeds(cmd) => write!(f, "command `{cmd}`"),
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(true) => write!(f, "yes"),
            Self::Flag(false) => write!(f, "no"),
            Self::Digest(Some(digest)) => write!(f, "sha256:{}", &digest[..12.min(digest.len())]),
            Self::Digest(None) => write!(f, "absent"),
            Self::HttpStatus(Some(status)) => write!(f, "HTTP {status}"),
            Self::HttpStatus(None) => write!(f, "unreachable"),
        }
    }
}
