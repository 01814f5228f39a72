use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::model::{Mod, ModVersion};
use crate::core::error::{ManagerError, ManagerResult};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Clamp a caller-supplied page size into `1..=MAX_PAGE_LIMIT`.
pub fn page_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_versions: Option<Vec<String>>,
}

impl HealthStatus {
    pub fn is_version_disabled(&self, app_version: &str) -> bool {
        self.disabled_versions
            .as_ref()
            .is_some_and(|versions| versions.iter().any(|v| v == app_version))
    }
}

/// Read interface over a mod catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn get_health(&self) -> ManagerResult<HealthStatus>;

    async fn get_mod_list(
        &self,
        limit: Option<usize>,
        after: Option<&str>,
        before: Option<&str>,
    ) -> ManagerResult<Vec<Mod>>;

    async fn get_mod(&self, mod_id: &str) -> ManagerResult<Option<Mod>>;

    async fn get_mod_versions(
        &self,
        mod_id: &str,
        limit: Option<usize>,
        after: Option<&str>,
    ) -> ManagerResult<Vec<ModVersion>>;

    async fn get_mod_version(
        &self,
        mod_id: &str,
        version_id: &str,
    ) -> ManagerResult<Option<ModVersion>>;

    async fn get_latest_mod_version(&self, mod_id: &str) -> ManagerResult<Option<ModVersion>> {
        match self.get_mod(mod_id).await? {
            Some(m) => self.get_mod_version(mod_id, &m.latest_version).await,
            None => Ok(None),
        }
    }

    /// Latest version of every installed mod whose installed id differs.
    ///
    /// Lookup failures for a single mod are logged and that mod is omitted.
    async fn check_for_updates(
        &self,
        installed: &BTreeMap<String, String>,
    ) -> ManagerResult<BTreeMap<String, ModVersion>> {
        let mut updates = BTreeMap::new();

        for (mod_id, version_id) in installed {
            match self.get_latest_mod_version(mod_id).await {
                Ok(Some(latest)) if &latest.id != version_id => {
                    updates.insert(mod_id.clone(), latest);
                }
                Ok(_) => {}
                Err(e) => warn!("Update check failed for {}: {}", mod_id, e),
            }
        }

        Ok(updates)
    }
}

/// Fetch a version that must exist; `version_id = None` means latest.
pub async fn require_version(
    catalog: &dyn CatalogClient,
    mod_id: &str,
    version_id: Option<&str>,
) -> ManagerResult<ModVersion> {
    let found = match version_id {
        Some(version_id) => catalog.get_mod_version(mod_id, version_id).await?,
        None => catalog.get_latest_mod_version(mod_id).await?,
    };

    found.ok_or_else(|| ManagerError::VersionNotFound {
        mod_id: mod_id.to_string(),
        version_id: version_id.unwrap_or("latest").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limit_defaults_and_clamps() {
        assert_eq!(page_limit(None), 50);
        assert_eq!(page_limit(Some(0)), 1);
        assert_eq!(page_limit(Some(500)), 100);
        assert_eq!(page_limit(Some(20)), 20);
    }

    #[test]
    fn disabled_versions_are_matched_exactly() {
        let health: HealthStatus = serde_json::from_str(
            r#"{"status": "ok", "working_version": "1.4.0", "disabled_versions": ["1.2.0"]}"#,
        )
        .unwrap();
        assert!(health.is_version_disabled("1.2.0"));
        assert!(!health.is_version_disabled("1.2"));

        let bare: HealthStatus = serde_json::from_str(r#"{"status": "ok"}"#).unwrap();
        assert!(!bare.is_version_disabled("1.2.0"));
    }
}
