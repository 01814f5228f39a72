// ─── Loader Configuration ───
// Writes the doorstop_config.ini the injected loader reads at game start.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::error::{ManagerError, ManagerResult};

pub const DOORSTOP_CONFIG_FILE: &str = "doorstop_config.ini";

const TARGET_ASSEMBLY: &str = "BepInEx/core/BepInEx.Unity.IL2CPP.dll";
const CORECLR_PATH: &str = "dotnet/coreclr.dll";
const CORLIB_DIR: &str = "dotnet";

/// Values of the loader configuration. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorstopConfig {
    pub target_assembly: PathBuf,
    pub coreclr_path: PathBuf,
    pub corlib_dir: PathBuf,
}

impl DoorstopConfig {
    /// Configuration pointing at the loader files inside `staging_dir`.
    pub fn for_staging(staging_dir: &Path) -> ManagerResult<Self> {
        let root =
            std::path::absolute(staging_dir).map_err(|e| ManagerError::io(staging_dir, e))?;
        Ok(Self {
            target_assembly: root.join(TARGET_ASSEMBLY),
            coreclr_path: root.join(CORECLR_PATH),
            corlib_dir: root.join(CORLIB_DIR),
        })
    }

    pub fn render(&self) -> String {
        let mut ini = String::new();
        let _ = writeln!(ini, "[General]");
        let _ = writeln!(ini, "enabled = true");
        let _ = writeln!(ini, "target_assembly = {}", self.target_assembly.display());
        let _ = writeln!(ini, "redirect_output_log = false");
        let _ = writeln!(ini, "boot_config_override =");
        let _ = writeln!(ini, "ignore_disable_switch = false");
        let _ = writeln!(ini);
        let _ = writeln!(ini, "[UnityMono]");
        let _ = writeln!(ini, "dll_search_path_override =");
        let _ = writeln!(ini, "debug_enabled = false");
        let _ = writeln!(ini, "debug_start_server = true");
        let _ = writeln!(ini, "debug_address = 127.0.0.1:10000");
        let _ = writeln!(ini, "debug_suspend = false");
        let _ = writeln!(ini);
        let _ = writeln!(ini, "[Il2Cpp]");
        let _ = writeln!(ini, "coreclr_path = {}", self.coreclr_path.display());
        let _ = writeln!(ini, "corlib_dir = {}", self.corlib_dir.display());
        ini
    }

    /// Write the file into `staging_dir` and return its path.
    pub async fn write(&self, staging_dir: &Path) -> ManagerResult<PathBuf> {
        let path = staging_dir.join(DOORSTOP_CONFIG_FILE);
        tokio::fs::write(&path, self.render())
            .await
            .map_err(|e| ManagerError::io(&path, e))?;
        debug!("Wrote {:?}", path);
        Ok(path)
    }
}
