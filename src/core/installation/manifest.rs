use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::catalog::ModVersion;
use crate::core::error::{ManagerError, ManagerResult};

/// Manifest file name inside the game root.
pub const MANIFEST_FILE: &str = ".mod_installation";

/// Newest `file_version` this build reads and the only one it writes.
pub const CURRENT_FILE_VERSION: u32 = 2;

/// At-rest classification stored in the manifest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Compatible,
    Incompatible,
    Broken,
    #[default]
    Unknown,
}

/// Provenance of one installed version: every path it wrote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstalledModInfo {
    pub mod_id: String,
    pub mod_version: ModVersion,
    #[serde(default)]
    pub paths: Vec<String>,
}

impl InstalledModInfo {
    pub fn new(version: &ModVersion) -> Self {
        Self {
            mod_id: version.mod_id.clone(),
            mod_version: version.clone(),
            paths: Vec::new(),
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.mod_id.clone(), self.mod_version.id.clone())
    }
}

/// Contents of `.mod_installation`.
///
/// Versions 0 and 1 describe a single mod plus the vanilla file list;
/// version 2 records per-mod paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallationInfo {
    #[serde(default)]
    pub file_version: u32,
    #[serde(default)]
    pub status: InstallStatus,
    #[serde(default)]
    pub installed_game_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub installed_mods: Vec<InstalledModInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_mod: Option<ModVersion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vanilla_files: Vec<String>,
}

impl InstallationInfo {
    pub fn new(game_version: &str, status: InstallStatus) -> Self {
        Self {
            file_version: CURRENT_FILE_VERSION,
            status,
            installed_game_version: game_version.to_string(),
            installed_mods: Vec::new(),
            installed_mod: None,
            vanilla_files: Vec::new(),
        }
    }

    pub fn path(game_root: &Path) -> PathBuf {
        game_root.join(MANIFEST_FILE)
    }

    pub fn is_legacy(&self) -> bool {
        self.file_version < CURRENT_FILE_VERSION
    }

    /// Vanilla file list of a version 0/1 manifest.
    pub fn old_vanilla_files(&self) -> Option<&[String]> {
        self.is_legacy().then_some(self.vanilla_files.as_slice())
    }

    /// Installed mods regardless of format; legacy entries carry no paths.
    pub fn installed(&self) -> Vec<InstalledModInfo> {
        if self.is_legacy() {
            return self
                .installed_mod
                .iter()
                .map(InstalledModInfo::new)
                .collect();
        }
        self.installed_mods.clone()
    }

    /// `mod_id -> version_id` of everything installed.
    pub fn installed_versions(&self) -> BTreeMap<String, String> {
        self.installed()
            .into_iter()
            .map(|info| (info.mod_id, info.mod_version.id))
            .collect()
    }

    pub fn installed_keys(&self) -> HashSet<(String, String)> {
        self.installed().iter().map(InstalledModInfo::key).collect()
    }

    pub fn parse(json: &str) -> ManagerResult<Self> {
        let info: Self =
            serde_json::from_str(json).map_err(|e| ManagerError::InvalidManifest(e.to_string()))?;

        match info.file_version {
            0 | 1 => Ok(info),
            CURRENT_FILE_VERSION => Ok(info),
            found => Err(ManagerError::UnsupportedManifestVersion {
                found,
                supported: CURRENT_FILE_VERSION,
            }),
        }
    }

    /// Read the manifest of `game_root`; `None` when no manifest exists.
    pub async fn load(game_root: &Path) -> ManagerResult<Option<Self>> {
        let path = Self::path(game_root);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ManagerError::io(path, e)),
        };

        Self::parse(&json).map(Some)
    }

    /// Persist atomically: write a sibling temp file, then rename over.
    pub async fn save(&self, game_root: &Path) -> ManagerResult<()> {
        if self.file_version != CURRENT_FILE_VERSION {
            return Err(ManagerError::InvalidManifest(format!(
                "refusing to write manifest version {}",
                self.file_version
            )));
        }

        let path = Self::path(game_root);
        let tmp = game_root.join(format!("{}.tmp", MANIFEST_FILE));
        let json = serde_json::to_string_pretty(self)?;

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| ManagerError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ManagerError::io(&path, e))?;

        debug!("Wrote manifest {:?} ({:?})", path, self.status);
        Ok(())
    }

    pub async fn remove(game_root: &Path) -> ManagerResult<()> {
        let path = Self::path(game_root);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ManagerError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    fn v2_json() -> &'static str {
        r#"{
            "file_version": 2,
            "status": "compatible",
            "installed_game_version": "2024.6.18",
            "installed_mods": [
                {"mod_id": "m1", "mod_version": {"id": "v1", "mod_id": "m1"}, "paths": ["Mod.dll"]}
            ]
        }"#
    }

    #[test]
    fn v2_round_trip_is_stable() {
        let parsed = InstallationInfo::parse(v2_json()).unwrap();
        let first = serde_json::to_value(&parsed).unwrap();
        let reparsed = InstallationInfo::parse(&serde_json::to_string(&parsed).unwrap()).unwrap();
        let second = serde_json::to_value(&reparsed).unwrap();

        assert_eq!(first, second);
        assert_eq!(parsed.status, InstallStatus::Compatible);
        assert_eq!(parsed.installed_mods[0].paths, vec!["Mod.dll"]);
        assert!(parsed.old_vanilla_files().is_none());
    }

    #[test]
    fn legacy_manifest_exposes_vanilla_files() {
        let json = r#"{
            "installed_mod": {"id": "v3", "mod_id": "old"},
            "installed_game_version": "2023.1.1",
            "vanilla_files": ["Game.exe", "UnityPlayer.dll"]
        }"#;
        let info = InstallationInfo::parse(json).unwrap();

        assert_eq!(info.file_version, 0);
        assert!(info.is_legacy());
        assert_eq!(
            info.old_vanilla_files(),
            Some(&["Game.exe".to_string(), "UnityPlayer.dll".to_string()][..])
        );
        assert_eq!(info.installed_versions()["old"], "v3");
    }

    #[test]
    fn future_versions_fail_fast() {
        let err = InstallationInfo::parse(r#"{"file_version": 3}"#).unwrap_err();
        assert!(matches!(
            err,
            ManagerError::UnsupportedManifestVersion { found: 3, .. }
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidManifest);

        let err = InstallationInfo::parse("{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidManifest);
    }

    #[tokio::test]
    async fn save_load_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InstallationInfo::load(dir.path()).await.unwrap().is_none());

        let info = InstallationInfo::new("2024.6.18", InstallStatus::Broken);
        info.save(dir.path()).await.unwrap();
        let loaded = InstallationInfo::load(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded, info);
        assert!(!dir.path().join(".mod_installation.tmp").exists());

        InstallationInfo::remove(dir.path()).await.unwrap();
        assert!(!InstallationInfo::path(dir.path()).exists());
    }
}
