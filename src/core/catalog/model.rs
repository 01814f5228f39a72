use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{ManagerError, ManagerResult};

/// Kind of catalog entry. Libraries are only installed as dependencies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModType {
    #[default]
    Mod,
    Library,
    Modpack,
}

/// Architecture tag of the game executable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BinaryType {
    X86,
    X64,
    #[default]
    Unknown,
}

impl BinaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryType::X86 => "x86",
            BinaryType::X64 => "x64",
            BinaryType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BinaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BinaryType {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86" => Ok(BinaryType::X86),
            "x64" => Ok(BinaryType::X64),
            "unknown" => Ok(BinaryType::Unknown),
            other => Err(ManagerError::Other(format!("Unknown binary type: {}", other))),
        }
    }
}

/// Storefront the game was installed from. Keys `ModVersion::target_version`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    #[default]
    Steam,
    Epic,
    Unknown,
}

impl LauncherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LauncherKind::Steam => "steam",
            LauncherKind::Epic => "epic",
            LauncherKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LauncherKind {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "steam" => Ok(LauncherKind::Steam),
            "epic" => Ok(LauncherKind::Epic),
            "unknown" => Ok(LauncherKind::Unknown),
            other => Err(ManagerError::Other(format!("Unknown launcher: {}", other))),
        }
    }
}

/// A named unit in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mod {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(rename = "type", default)]
    pub mod_type: ModType,
    pub latest_version: String,
    #[serde(default)]
    pub description: String,
}

impl Mod {
    /// Whether the mod shows up in user-facing listings.
    pub fn is_listed(&self) -> bool {
        self.mod_type != ModType::Library
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Required,
    Optional,
    Conflict,
    Embedded,
}

/// Typed edge from a version to another mod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModDependency {
    pub id: String,
    /// Absent means "latest".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub dep_type: DependencyType,
}

/// Member of a modpack version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModPack {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Zip,
    Normal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModFile {
    pub compatible: Vec<BinaryType>,
    pub file_type: FileType,
    /// Destination relative to the install root; required for `normal` files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub url: String,
}

impl ModFile {
    pub fn is_compatible_with(&self, binary_type: BinaryType) -> bool {
        self.compatible.contains(&binary_type)
    }
}

/// A specific release of a mod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModVersion {
    pub id: String,
    #[serde(default)]
    pub mod_id: String,
    #[serde(default = "epoch")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub dependencies: Vec<ModDependency>,
    #[serde(default)]
    pub mods: Vec<ModPack>,
    #[serde(default)]
    pub files: Vec<ModFile>,
    /// Launcher kind -> required game version. Empty means any.
    #[serde(default)]
    pub target_version: BTreeMap<String, String>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl ModVersion {
    /// `mod_id@version_id`, used in logs and error payloads.
    pub fn key(&self) -> String {
        format!("{}@{}", self.mod_id, self.id)
    }

    /// Meta-mods and modpacks ship no files and only pull in other mods.
    pub fn is_meta(&self) -> bool {
        self.files.is_empty() && (!self.dependencies.is_empty() || !self.mods.is_empty())
    }

    pub fn is_compatible(
        &self,
        launcher: LauncherKind,
        binary_type: BinaryType,
        game_version: &str,
    ) -> bool {
        let version_matches = self
            .target_version
            .get(launcher.as_str())
            .map_or(true, |target| target == game_version);

        version_matches && (self.downloads(binary_type).next().is_some() || self.is_meta())
    }

    /// Files meant for `binary_type`, in catalog order.
    pub fn downloads(&self, binary_type: BinaryType) -> impl Iterator<Item = &ModFile> + '_ {
        self.files
            .iter()
            .filter(move |f| f.is_compatible_with(binary_type))
    }

    pub fn compatible_files_count(&self, binary_type: BinaryType) -> usize {
        self.downloads(binary_type).count()
    }

    /// Check the structural invariants of a catalog version.
    pub fn validate(&self, expected_mod_id: &str) -> ManagerResult<()> {
        if self.mod_id != expected_mod_id {
            return Err(ManagerError::InvalidCatalogEntry {
                key: self.key(),
                reason: format!("belongs to mod '{}'", expected_mod_id),
            });
        }

        for file in &self.files {
            if file.file_type != FileType::Normal {
                continue;
            }
            let path = file.path.as_deref().unwrap_or_default();
            if path.is_empty() {
                return Err(ManagerError::InvalidCatalogEntry {
                    key: self.key(),
                    reason: format!("normal file {} has no path", file.url),
                });
            }
            safe_relative_path(path).map_err(|_| ManagerError::InvalidCatalogEntry {
                key: self.key(),
                reason: format!("file path '{}' escapes the install root", path),
            })?;
        }

        Ok(())
    }
}

/// Normalize a catalog or archive path into a root-relative, `/`-separated form.
///
/// Rejects absolute paths, drive prefixes and any `..` component.
pub fn safe_relative_path(raw: &str) -> ManagerResult<String> {
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(ManagerError::PathEscape(raw.to_string()));
    }

    let mut parts = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ManagerError::PathEscape(raw.to_string()));
            }
        }
    }

    if parts.is_empty() || parts.iter().any(|p| p.contains(':')) {
        return Err(ManagerError::PathEscape(raw.to_string()));
    }

    Ok(parts.join("/"))
}
