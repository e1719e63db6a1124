//! Opaque session credential material
//!
//! The sidecar owns the schema of its authentication state. The gateway
//! only sees named text entries (one per file on disk) and never looks
//! inside them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Authenticated-session material, keyed by entry name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCredentials {
    entries: BTreeMap<String, String>,
}

impl SessionCredentials {
    /// Create an empty credential set
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an entry by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, name: impl Into<String>, contents: impl Into<String>) {
        self.entries.insert(name.into(), contents.into());
    }

    /// Iterate entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entry names in name order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge an update emitted by the sidecar into this set
    ///
    /// Removals are applied after upserts, so an entry named in both is gone.
    pub fn apply(&mut self, update: CredentialsUpdate) {
        self.entries.extend(update.entries);
        for name in update.removed {
            self.entries.remove(&name);
        }
    }
}

/// Incremental change to the credential set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsUpdate {
    /// Entries created or replaced
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
    /// Entries deleted
    #[serde(default)]
    pub removed: Vec<String>,
}

impl CredentialsUpdate {
    /// True when the update changes nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.removed.is_empty()
    }
}
