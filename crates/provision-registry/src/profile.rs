use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};

/// Installed state of one profile at one point in time.
///
/// Every mutator flips the `changed` flag; the flag is never persisted and is
/// how the engine decides whether a committed transaction needs a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    id: String,
    timestamp: u64,
    #[serde(default)]
    units: BTreeMap<String, Version>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(skip)]
    changed: bool,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: 0,
            units: BTreeMap::new(),
            properties: BTreeMap::new(),
            changed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    pub fn units(&self) -> &BTreeMap<String, Version> {
        &self.units
    }

    pub fn unit_version(&self, id: &str) -> Option<&Version> {
        self.units.get(id)
    }

    pub fn is_installed(&self, id: &str, version: &Version) -> bool {
        self.units.get(id) == Some(version)
    }

    /// Records `id` at `version`, returning the version it replaced.
    pub fn add_unit(&mut self, id: impl Into<String>, version: Version) -> Option<Version> {
        self.changed = true;
        self.units.insert(id.into(), version)
    }

    pub fn remove_unit(&mut self, id: &str) -> Option<Version> {
        let removed = self.units.remove(id);
        if removed.is_some() {
            self.changed = true;
        }
        removed
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.changed = true;
        self.properties.insert(key.into(), value.into())
    }

    pub fn remove_property(&mut self, key: &str) -> Option<String> {
        let removed = self.properties.remove(key);
        if removed.is_some() {
            self.changed = true;
        }
        removed
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed = false;
    }
}
