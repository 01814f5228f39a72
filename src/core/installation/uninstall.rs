use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::manifest::{InstallationInfo, InstalledModInfo, MANIFEST_FILE};
use crate::core::catalog::safe_relative_path;
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::progress::{CancelFlag, ProgressSpan};

/// `(mod_id, version_id)` pairs that survive a partial uninstall.
pub type KeepSet = HashSet<(String, String)>;

/// Delete the files of every installed mod not in `keep`.
///
/// Returns the manifest entries that were kept. Legacy manifests cannot be
/// split per mod, so they are always removed completely.
pub(crate) async fn remove_unkept(
    game_root: &Path,
    info: &InstallationInfo,
    keep: &KeepSet,
    span: ProgressSpan<'_>,
    cancel: &CancelFlag,
) -> ManagerResult<Vec<InstalledModInfo>> {
    if let Some(vanilla) = info.old_vanilla_files() {
        remove_non_vanilla(game_root, vanilla, cancel)?;
        span.set(1.0);
        return Ok(Vec::new());
    }

    let (kept, removed): (Vec<_>, Vec<_>) = info
        .installed_mods
        .iter()
        .cloned()
        .partition(|entry| keep.contains(&entry.key()));

    let protected: HashSet<&str> = kept
        .iter()
        .flat_map(|entry| entry.paths.iter().map(String::as_str))
        .collect();

    let mut paths: Vec<&str> = removed
        .iter()
        .flat_map(|entry| entry.paths.iter().map(String::as_str))
        .filter(|path| !protected.contains(path))
        .collect();
    paths.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    paths.dedup();

    let total = paths.len().max(1) as f64;
    for (i, path) in paths.iter().enumerate() {
        cancel.check()?;
        remove_recorded_path(game_root, path)?;
        span.set((i + 1) as f64 / total);
    }

    info!(
        "Removed {} mods ({} files), kept {}",
        removed.len(),
        paths.len(),
        kept.len()
    );
    span.set(1.0);
    Ok(kept)
}

/// Delete one recorded path, then every ancestor directory left empty.
fn remove_recorded_path(game_root: &Path, recorded: &str) -> ManagerResult<()> {
    let relative = safe_relative_path(recorded)?;
    let full = game_root.join(&relative);

    match std::fs::remove_file(&full) {
        Ok(()) => debug!("Removed {}", relative),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ManagerError::io(&full, e)),
    }

    let mut current = full.parent();
    while let Some(dir) = current {
        if dir == game_root || !dir.starts_with(game_root) {
            break;
        }
        if !is_empty_dir(dir) {
            break;
        }
        std::fs::remove_dir(dir).map_err(|e| ManagerError::io(dir, e))?;
        current = dir.parent();
    }

    Ok(())
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// Legacy policy: everything that is neither vanilla, inside the `*_Data`
/// tree, nor the manifest itself goes.
fn remove_non_vanilla(
    game_root: &Path,
    vanilla_files: &[String],
    cancel: &CancelFlag,
) -> ManagerResult<()> {
    let vanilla: HashSet<String> = vanilla_files
        .iter()
        .map(|p| p.replace('\\', "/").trim_start_matches("./").to_string())
        .collect();

    let mut removed = 0usize;
    for entry in WalkDir::new(game_root).min_depth(1).contents_first(true) {
        cancel.check()?;
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry during uninstall: {}", e);
                continue;
            }
        };

        let Ok(relative) = entry.path().strip_prefix(game_root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");

        if relative == MANIFEST_FILE || is_data_tree(&relative) || vanilla.contains(&relative) {
            continue;
        }

        if entry.file_type().is_dir() {
            if is_empty_dir(entry.path()) {
                std::fs::remove_dir(entry.path()).map_err(|e| ManagerError::io(entry.path(), e))?;
            }
        } else {
            std::fs::remove_file(entry.path()).map_err(|e| ManagerError::io(entry.path(), e))?;
            removed += 1;
        }
    }

    info!("Legacy uninstall removed {} files", removed);
    Ok(())
}

/// True for paths inside the game's `<Name>_Data` directory.
fn is_data_tree(relative: &str) -> bool {
    relative
        .split('/')
        .next()
        .is_some_and(|first| first.ends_with("_Data"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::catalog::ModVersion;
    use crate::core::installation::manifest::InstallStatus;

    fn entry(mod_id: &str, version: &str, paths: &[&str]) -> InstalledModInfo {
        InstalledModInfo {
            mod_id: mod_id.into(),
            mod_version: serde_json::from_value::<ModVersion>(serde_json::json!({
                "id": version,
                "mod_id": mod_id
            }))
            .unwrap(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, relative).unwrap();
    }

    #[tokio::test]
    async fn removes_unkept_paths_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "BepInEx/plugins/a/A.dll");
        touch(root, "BepInEx/plugins/b/B.dll");
        touch(root, "BepInEx/plugins/b/cfg/B.cfg");
        touch(root, "Game.exe");

        let mut info = InstallationInfo::new("1", InstallStatus::Compatible);
        info.installed_mods = vec![
            entry("a", "1", &["BepInEx/plugins/a/A.dll"]),
            entry("b", "1", &["BepInEx/plugins/b/B.dll", "BepInEx/plugins/b/cfg/B.cfg"]),
        ];

        let keep = KeepSet::from([("a".to_string(), "1".to_string())]);
        let kept = remove_unkept(root, &info, &keep, ProgressSpan::new(None), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].mod_id, "a");
        assert!(root.join("BepInEx/plugins/a/A.dll").exists());
        assert!(!root.join("BepInEx/plugins/b").exists());
        assert!(root.join("Game.exe").exists());
    }

    #[tokio::test]
    async fn shared_path_of_kept_mod_survives() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "shared.dll");

        let mut info = InstallationInfo::new("1", InstallStatus::Compatible);
        info.installed_mods = vec![
            entry("a", "1", &["shared.dll"]),
            entry("b", "1", &["shared.dll"]),
        ];

        let keep = KeepSet::from([("a".to_string(), "1".to_string())]);
        remove_unkept(root, &info, &keep, ProgressSpan::new(None), &CancelFlag::new())
            .await
            .unwrap();
        assert!(root.join("shared.dll").exists());
    }

    #[tokio::test]
    async fn legacy_uninstall_keeps_vanilla_and_data_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "Game.exe");
        touch(root, "Game_Data/globalgamemanagers");
        touch(root, "Game_Data/Managed/Extra.dll");
        touch(root, "BepInEx/core/BepInEx.dll");
        touch(root, "winhttp.dll");
        touch(root, MANIFEST_FILE);

        let info = InstallationInfo::parse(
            r#"{"file_version": 1, "installed_game_version": "1", "vanilla_files": ["Game.exe"]}"#,
        )
        .unwrap();

        let kept = remove_unkept(
            root,
            &info,
            &KeepSet::new(),
            ProgressSpan::new(None),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert!(kept.is_empty());
        assert!(root.join("Game.exe").exists());
        assert!(root.join("Game_Data/Managed/Extra.dll").exists());
        assert!(root.join(MANIFEST_FILE).exists());
        assert!(!root.join("winhttp.dll").exists());
        assert!(!root.join("BepInEx").exists());
    }

    #[test]
    fn data_tree_detection() {
        assert!(is_data_tree("Game_Data/level0"));
        assert!(!is_data_tree("BepInEx/Game_Data"));
    }
}
