use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::catalog::ModVersion;

/// A named, ordered selection of mod versions the user can launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub versions: Vec<ModVersion>,
    pub last_updated: DateTime<Utc>,
}

impl Profile {
    /// Create an empty profile with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            versions: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Select `version`, replacing any other version of the same mod in place.
    pub fn select(&mut self, version: ModVersion) {
        match self.versions.iter_mut().find(|v| v.mod_id == version.mod_id) {
            Some(existing) => *existing = version,
            None => self.versions.push(version),
        }
    }

    /// Drop the selection for `mod_id`; returns whether anything was removed.
    pub fn deselect(&mut self, mod_id: &str) -> bool {
        let before = self.versions.len();
        self.versions.retain(|v| v.mod_id != mod_id);
        self.versions.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(mod_id: &str, id: &str) -> ModVersion {
        serde_json::from_value(serde_json::json!({"id": id, "mod_id": mod_id})).unwrap()
    }

    #[test]
    fn select_replaces_same_mod_in_place() {
        let mut profile = Profile::new("Main");
        profile.select(version("a", "1"));
        profile.select(version("b", "1"));
        profile.select(version("a", "2"));

        let ids: Vec<_> = profile.versions.iter().map(ModVersion::key).collect();
        assert_eq!(ids, vec!["a@2", "b@1"]);

        assert!(profile.deselect("a"));
        assert!(!profile.deselect("a"));
        assert_eq!(profile.versions.len(), 1);
    }

    #[test]
    fn ids_are_unique_uuids() {
        let a = Profile::new("x");
        let b = Profile::new("x");
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }
}
