use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::client::{page_limit, CatalogClient, HealthStatus};
use super::model::{Mod, ModVersion};
use crate::core::error::{ManagerError, ManagerResult};

/// One mod of a catalog export, with every version inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedMod {
    #[serde(flatten)]
    pub info: Mod,
    #[serde(default)]
    pub versions: Vec<ModVersion>,
}

/// Top-level JSON shape of a catalog export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogExport {
    pub mods: Vec<ExportedMod>,
}

/// Catalog backed by an in-memory copy of an export file.
pub struct LocalCatalog {
    /// Sorted by id for id-based pagination.
    mods: BTreeMap<String, Mod>,
    /// Newest first.
    versions: BTreeMap<String, Vec<ModVersion>>,
}

impl LocalCatalog {
    pub async fn load(path: &Path) -> ManagerResult<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ManagerError::io(path, e))?;
        let export: CatalogExport = serde_json::from_str(&json)?;
        let catalog = Self::from_export(export)?;

        info!(
            "Loaded local catalog {:?} with {} mods",
            path,
            catalog.mods.len()
        );
        Ok(catalog)
    }

    pub fn from_export(export: CatalogExport) -> ManagerResult<Self> {
        let mut mods = BTreeMap::new();
        let mut versions = BTreeMap::new();

        for exported in export.mods {
            let mod_id = exported.info.id.clone();
            let mut list = exported.versions;
            for version in &mut list {
                if version.mod_id.is_empty() {
                    version.mod_id = mod_id.clone();
                }
                version.validate(&mod_id)?;
            }
            list.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            versions.insert(mod_id.clone(), list);
            mods.insert(mod_id, exported.info);
        }

        Ok(Self { mods, versions })
    }

    /// Build directly from mods and their versions.
    pub fn from_parts(mods: Vec<Mod>, versions: Vec<ModVersion>) -> ManagerResult<Self> {
        let mut grouped: BTreeMap<String, Vec<ModVersion>> = BTreeMap::new();
        for version in versions {
            grouped.entry(version.mod_id.clone()).or_default().push(version);
        }

        let export = CatalogExport {
            mods: mods
                .into_iter()
                .map(|info| ExportedMod {
                    versions: grouped.remove(&info.id).unwrap_or_default(),
                    info,
                })
                .collect(),
        };

        if let Some(orphan) = grouped.keys().next() {
            return Err(ManagerError::ModNotFound(orphan.clone()));
        }

        Self::from_export(export)
    }
}

#[async_trait]
impl CatalogClient for LocalCatalog {
    async fn get_health(&self) -> ManagerResult<HealthStatus> {
        Ok(HealthStatus {
            status: "ok".to_string(),
            working_version: None,
            disabled_versions: None,
        })
    }

    async fn get_mod_list(
        &self,
        limit: Option<usize>,
        after: Option<&str>,
        before: Option<&str>,
    ) -> ManagerResult<Vec<Mod>> {
        Ok(self
            .mods
            .values()
            .filter(|m| after.map_or(true, |a| m.id.as_str() > a))
            .filter(|m| before.map_or(true, |b| m.id.as_str() < b))
            .take(page_limit(limit))
            .cloned()
            .collect())
    }

    async fn get_mod(&self, mod_id: &str) -> ManagerResult<Option<Mod>> {
        Ok(self.mods.get(mod_id).cloned())
    }

    async fn get_mod_versions(
        &self,
        mod_id: &str,
        limit: Option<usize>,
        after: Option<&str>,
    ) -> ManagerResult<Vec<ModVersion>> {
        let list = self
            .versions
            .get(mod_id)
            .ok_or_else(|| ManagerError::ModNotFound(mod_id.to_string()))?;

        let start = match after {
            Some(after) => list
                .iter()
                .position(|v| v.id == after)
                .map_or(list.len(), |idx| idx + 1),
            None => 0,
        };

        Ok(list
            .iter()
            .skip(start)
            .take(page_limit(limit))
            .cloned()
            .collect())
    }

    async fn get_mod_version(
        &self,
        mod_id: &str,
        version_id: &str,
    ) -> ManagerResult<Option<ModVersion>> {
        Ok(self
            .versions
            .get(mod_id)
            .and_then(|list| list.iter().find(|v| v.id == version_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::model::ModType;
    use chrono::{TimeZone, Utc};

    fn catalog() -> LocalCatalog {
        let json = r#"{
            "mods": [
                {"id": "b-mod", "name": "B", "type": "mod", "latest_version": "2",
                 "versions": [
                    {"id": "1", "created_at": "2024-01-01T00:00:00Z"},
                    {"id": "2", "created_at": "2024-02-01T00:00:00Z"}
                 ]},
                {"id": "a-lib", "name": "A", "type": "library", "latest_version": "1.0",
                 "versions": [{"id": "1.0"}]}
            ]
        }"#;
        LocalCatalog::from_export(serde_json::from_str(json).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn lists_mods_by_id_with_bounds() {
        let catalog = catalog();
        let all = catalog.get_mod_list(None, None, None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a-lib", "b-mod"]);
        assert_eq!(all[0].mod_type, ModType::Library);
        assert!(!all[0].is_listed());

        let after = catalog.get_mod_list(None, Some("a-lib"), None).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, "b-mod");

        let before = catalog.get_mod_list(Some(10), None, Some("b-mod")).await.unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].id, "a-lib");
    }

    #[tokio::test]
    async fn versions_are_newest_first_and_stamped() {
        let catalog = catalog();
        let versions = catalog.get_mod_versions("b-mod", None, None).await.unwrap();
        assert_eq!(versions[0].id, "2");
        assert_eq!(versions[0].mod_id, "b-mod");
        assert_eq!(
            versions[1].created_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );

        let page = catalog.get_mod_versions("b-mod", Some(5), Some("2")).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "1");

        assert!(catalog.get_mod_versions("missing", None, None).await.is_err());
    }

    #[tokio::test]
    async fn latest_version_follows_mod_pointer() {
        let catalog = catalog();
        let latest = catalog.get_latest_mod_version("a-lib").await.unwrap().unwrap();
        assert_eq!(latest.id, "1.0");
        assert!(catalog.get_latest_mod_version("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_check_skips_current_and_unknown_mods() {
        let catalog = catalog();
        let installed = BTreeMap::from([
            ("b-mod".to_string(), "1".to_string()),
            ("a-lib".to_string(), "1.0".to_string()),
            ("gone".to_string(), "3".to_string()),
        ]);
        let updates = catalog.check_for_updates(&installed).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates["b-mod"].id, "2");
    }
}
