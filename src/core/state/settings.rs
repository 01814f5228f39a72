use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::catalog::{BinaryType, LauncherKind, DEFAULT_SERVER_URL};
use crate::core::error::{ManagerError, ManagerResult};

/// Persisted user choices; command-line flags override them per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManagerSettings {
    pub server_url: String,
    /// Catalog export to use instead of the server.
    pub catalog_file: Option<PathBuf>,
    pub game_root: Option<PathBuf>,
    /// Player executable inside `game_root`; detected when unset.
    pub game_executable: Option<String>,
    pub launcher: LauncherKind,
    pub binary_type: BinaryType,
    pub game_version: Option<String>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            catalog_file: None,
            game_root: None,
            game_executable: None,
            launcher: LauncherKind::Steam,
            binary_type: BinaryType::X64,
            game_version: None,
        }
    }
}

impl ManagerSettings {
    /// Read settings, falling back to defaults when the file is missing or corrupt.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("Cannot read {:?}, using defaults: {}", path, e);
                return Self::default();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Corrupt settings at {:?}, using defaults: {}", path, e);
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> ManagerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ManagerError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| ManagerError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        assert_eq!(ManagerSettings::load(&path), ManagerSettings::default());

        std::fs::write(&path, "{ nope").unwrap();
        assert_eq!(ManagerSettings::load(&path), ManagerSettings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"game_version": "2024.6.18", "launcher": "epic"}"#).unwrap();

        let settings = ManagerSettings::load(&path);
        assert_eq!(settings.game_version.as_deref(), Some("2024.6.18"));
        assert_eq!(settings.launcher, LauncherKind::Epic);
        assert_eq!(settings.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.json");
        let settings = ManagerSettings {
            game_root: Some(PathBuf::from("/games/sunset")),
            binary_type: BinaryType::X86,
            ..ManagerSettings::default()
        };

        settings.save(&path).unwrap();
        assert_eq!(ManagerSettings::load(&path), settings);
    }
}
