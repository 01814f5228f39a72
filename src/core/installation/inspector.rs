use std::path::Path;

use serde::Serialize;
use tracing::warn;

use super::manifest::{InstallStatus, InstallationInfo};
use crate::core::catalog::{CatalogClient, ModType};
use crate::core::error::ManagerResult;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    NotInstalled,
    Broken,
    Incompatible,
    Installed,
}

/// An installed mod with a newer catalog release.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutdatedMod {
    pub mod_id: String,
    pub current: String,
    pub latest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallationStatus {
    pub state: InstallState,
    pub installation: Option<InstallationInfo>,
    pub outdated: Vec<OutdatedMod>,
}

/// Classify the installation in `game_root` against the running game version.
///
/// With `check_updates`, every installed non-library mod whose catalog latest
/// differs is reported as outdated. Catalog failures only omit that mod.
pub async fn status(
    game_root: &Path,
    game_version: &str,
    check_updates: bool,
    catalog: &dyn CatalogClient,
) -> ManagerResult<InstallationStatus> {
    let Some(info) = InstallationInfo::load(game_root).await? else {
        return Ok(InstallationStatus {
            state: InstallState::NotInstalled,
            installation: None,
            outdated: Vec::new(),
        });
    };

    let state = if info.status == InstallStatus::Broken {
        InstallState::Broken
    } else if info.installed_game_version != game_version {
        InstallState::Incompatible
    } else {
        InstallState::Installed
    };

    let outdated = if check_updates {
        outdated_mods(&info, catalog).await?
    } else {
        Vec::new()
    };

    Ok(InstallationStatus {
        state,
        installation: Some(info),
        outdated,
    })
}

async fn outdated_mods(
    info: &InstallationInfo,
    catalog: &dyn CatalogClient,
) -> ManagerResult<Vec<OutdatedMod>> {
    let installed = info.installed_versions();
    let updates = catalog.check_for_updates(&installed).await?;

    let mut outdated = Vec::new();
    for (mod_id, latest) in updates {
        match catalog.get_mod(&mod_id).await {
            Ok(Some(m)) if m.mod_type != ModType::Library => {}
            Ok(_) => continue,
            Err(e) => {
                warn!("Could not classify {}: {}", mod_id, e);
                continue;
            }
        }

        if let Some(current) = installed.get(&mod_id) {
            outdated.push(OutdatedMod {
                mod_id,
                current: current.clone(),
                latest: latest.id,
            });
        }
    }

    Ok(outdated)
}
