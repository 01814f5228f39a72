use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::catalog::{BinaryType, LauncherKind};
use crate::core::error::{ManagerError, ManagerResult};

/// Environment variable through which the loader finds its config.
pub const DOORSTOP_CONFIG_ENV: &str = "DOORSTOP_CONFIG_FILE";

/// Everything the core needs to know about the installed game.
#[async_trait]
pub trait GameEnvironment: Send + Sync {
    fn game_root(&self) -> &Path;
    fn launcher(&self) -> LauncherKind;
    fn binary_type(&self) -> BinaryType;
    async fn game_version(&self) -> ManagerResult<String>;
    fn is_game_running(&self) -> bool;
    /// Start the game with `staging_dir` as its loader configuration root.
    async fn launch(&self, staging_dir: &Path) -> ManagerResult<()>;
}

/// Game description assembled from settings and command-line flags.
#[derive(Debug, Clone)]
pub struct LocalGame {
    pub root: PathBuf,
    pub executable: String,
    pub launcher: LauncherKind,
    pub binary_type: BinaryType,
    pub version: Option<String>,
}

impl LocalGame {
    /// Find the Unity player executable: `<Name>.exe` next to `<Name>_Data/`.
    pub fn detect_executable(root: &Path) -> Option<String> {
        let entries = std::fs::read_dir(root).ok()?;
        let mut candidates: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix("_Data").map(|stem| format!("{}.exe", stem))
            })
            .filter(|exe| root.join(exe).is_file())
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    fn executable_path(&self) -> PathBuf {
        self.root.join(&self.executable)
    }
}

#[async_trait]
impl GameEnvironment for LocalGame {
    fn game_root(&self) -> &Path {
        &self.root
    }

    fn launcher(&self) -> LauncherKind {
        self.launcher
    }

    fn binary_type(&self) -> BinaryType {
        self.binary_type
    }

    async fn game_version(&self) -> ManagerResult<String> {
        self.version
            .clone()
            .ok_or_else(|| ManagerError::Other("Game version unknown; pass --game-version".into()))
    }

    fn is_game_running(&self) -> bool {
        let target = self.executable.to_ascii_lowercase();
        let mut system = sysinfo::System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        system.processes().values().any(|process| {
            process.name().to_string_lossy().to_ascii_lowercase() == target
        })
    }

    async fn launch(&self, staging_dir: &Path) -> ManagerResult<()> {
        let exe = self.executable_path();
        let config = staging_dir.join(crate::core::launch::DOORSTOP_CONFIG_FILE);

        let mut cmd = std::process::Command::new(&exe);
        cmd.current_dir(&self.root).env(DOORSTOP_CONFIG_ENV, &config);
        debug!("Command: {:?}", cmd);

        let child = cmd.spawn().map_err(|e| ManagerError::io(&exe, e))?;
        info!("Launched {:?} (pid {})", exe, child.id());
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_game_requires_known_version() {
        let game = LocalGame {
            root: PathBuf::from("/games/unity"),
            executable: "Game.exe".into(),
            launcher: LauncherKind::Steam,
            binary_type: BinaryType::X64,
            version: None,
        };
        assert!(game.game_version().await.is_err());
        assert_eq!(game.executable_path(), PathBuf::from("/games/unity/Game.exe"));
    }

    #[test]
    fn detects_player_next_to_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(LocalGame::detect_executable(dir.path()), None);

        std::fs::create_dir(dir.path().join("Sunset_Data")).unwrap();
        std::fs::write(dir.path().join("UnityCrashHandler64.exe"), "").unwrap();
        assert_eq!(LocalGame::detect_executable(dir.path()), None);

        std::fs::write(dir.path().join("Sunset.exe"), "").unwrap();
        assert_eq!(
            LocalGame::detect_executable(dir.path()).as_deref(),
            Some("Sunset.exe")
        );
    }
}
