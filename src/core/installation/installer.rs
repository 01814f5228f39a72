use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::manifest::{InstallStatus, InstallationInfo, InstalledModInfo};
use super::uninstall::{remove_unkept, KeepSet};
use crate::core::archive::{extract_zip, EscapePolicy, ZIP_DOWNLOAD_SHARE};
use crate::core::catalog::{safe_relative_path, BinaryType, FileType, LauncherKind, ModVersion};
use crate::core::downloader::FileSource;
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::game::{GameEnvironment, GameWatch};
use crate::core::progress::{CancelFlag, Progress, ProgressRun, ProgressSpan};

/// The game directory an install writes into, plus what it is compatible with.
#[derive(Debug, Clone)]
pub struct InstallTarget {
    pub game_root: PathBuf,
    pub game_version: String,
    pub launcher: LauncherKind,
    pub binary_type: BinaryType,
}

impl InstallTarget {
    pub async fn from_env(env: &dyn GameEnvironment) -> ManagerResult<Self> {
        Ok(Self {
            game_root: env.game_root().to_path_buf(),
            game_version: env.game_version().await?,
            launcher: env.launcher(),
            binary_type: env.binary_type(),
        })
    }
}

/// Owns the install manifest of a game directory.
///
/// At most one install or uninstall runs at a time; a second caller gets
/// `AlreadyRunning` instead of waiting.
pub struct Installer {
    source: Arc<dyn FileSource>,
    watch: Arc<GameWatch>,
    lock: Mutex<()>,
}

impl Installer {
    pub fn new(source: Arc<dyn FileSource>, watch: Arc<GameWatch>) -> Self {
        Self {
            source,
            watch,
            lock: Mutex::new(()),
        }
    }

    /// Install exactly `versions` into the target, replacing what was there.
    ///
    /// Versions already installed from a healthy manifest are kept without
    /// downloading. On failure the manifest stays `broken` with every path
    /// written so far.
    pub async fn install(
        &self,
        target: &InstallTarget,
        versions: &[ModVersion],
        progress: Option<&dyn Progress>,
        cancel: &CancelFlag,
    ) -> ManagerResult<InstallationInfo> {
        let _guard = self
            .lock
            .try_lock()
            .map_err(|_| ManagerError::AlreadyRunning)?;
        self.watch.ensure_not_running()?;
        let run = ProgressRun::start(progress)?;

        for version in versions {
            version.validate(&version.mod_id)?;
            if !version.is_compatible(target.launcher, target.binary_type, &target.game_version) {
                return Err(ManagerError::Incompatible(version.key()));
            }
        }

        let root = target.game_root.as_path();
        info!(
            "Installing {} versions into {:?} (game {})",
            versions.len(),
            root,
            target.game_version
        );

        let preserved = self.clear_previous(root, versions, cancel).await?;

        let mut info = InstallationInfo::new(&target.game_version, InstallStatus::Broken);
        info.installed_mods = versions.iter().map(InstalledModInfo::new).collect();
        info.save(root).await?;

        if let Err(e) = self
            .write_versions(target, versions, &preserved, &mut info, run.span(), cancel)
            .await
        {
            if let Err(save_err) = info.save(root).await {
                warn!("Failed to persist broken manifest: {}", save_err);
            }
            warn!("Install into {:?} failed: {}", root, e);
            return Err(e);
        }

        info.status = InstallStatus::Compatible;
        info.save(root).await?;
        info!("Install into {:?} complete", root);
        Ok(info)
    }

    /// Remove installed mods, keeping those in `keep`.
    ///
    /// An empty `keep` is a full uninstall and deletes the manifest; otherwise
    /// the manifest is rewritten with the surviving entries. Returns the
    /// manifest left on disk, if any.
    pub async fn uninstall(
        &self,
        game_root: &Path,
        progress: Option<&dyn Progress>,
        keep: &KeepSet,
        cancel: &CancelFlag,
    ) -> ManagerResult<Option<InstallationInfo>> {
        let _guard = self
            .lock
            .try_lock()
            .map_err(|_| ManagerError::AlreadyRunning)?;
        self.watch.ensure_not_running()?;
        let run = ProgressRun::start(progress)?;

        let Some(info) = InstallationInfo::load(game_root).await? else {
            debug!("Nothing installed in {:?}", game_root);
            return Ok(None);
        };

        let kept = remove_unkept(game_root, &info, keep, run.span(), cancel).await?;

        if kept.is_empty() {
            InstallationInfo::remove(game_root).await?;
            info!("Uninstalled everything from {:?}", game_root);
            return Ok(None);
        }

        let mut remaining = InstallationInfo::new(&info.installed_game_version, info.status);
        remaining.installed_mods = kept;
        remaining.save(game_root).await?;
        info!(
            "Uninstalled from {:?}, {} mods remain",
            game_root,
            remaining.installed_mods.len()
        );
        Ok(Some(remaining))
    }

    /// Partial-uninstall whatever a previous manifest recorded.
    ///
    /// Returns the recorded paths of every version that can be reused. A
    /// `broken` manifest may list versions whose files never finished, so
    /// nothing from it is reused.
    async fn clear_previous(
        &self,
        root: &Path,
        versions: &[ModVersion],
        cancel: &CancelFlag,
    ) -> ManagerResult<HashMap<(String, String), Vec<String>>> {
        let Some(previous) = InstallationInfo::load(root).await? else {
            return Ok(HashMap::new());
        };

        let keep: KeepSet = if previous.status == InstallStatus::Broken {
            info!("Previous install is broken; reinstalling everything");
            KeepSet::new()
        } else {
            versions
                .iter()
                .map(|v| (v.mod_id.clone(), v.id.clone()))
                .collect()
        };

        let kept = remove_unkept(root, &previous, &keep, ProgressSpan::new(None), cancel).await?;
        Ok(kept
            .into_iter()
            .map(|entry| (entry.key(), entry.paths))
            .collect())
    }

    async fn write_versions(
        &self,
        target: &InstallTarget,
        versions: &[ModVersion],
        preserved: &HashMap<(String, String), Vec<String>>,
        info: &mut InstallationInfo,
        span: ProgressSpan<'_>,
        cancel: &CancelFlag,
    ) -> ManagerResult<()> {
        let root = target.game_root.as_path();
        let count = versions.len().max(1) as f64;

        for (i, version) in versions.iter().enumerate() {
            let version_span = span.sub(i as f64 / count, 1.0 / count);
            let entry = &mut info.installed_mods[i];

            if let Some(paths) = preserved.get(&entry.key()) {
                debug!("{} already installed, reusing {} paths", version.key(), paths.len());
                entry.paths = paths.clone();
                version_span.set(1.0);
                continue;
            }

            self.write_version(
                root,
                version,
                target.binary_type,
                &mut entry.paths,
                version_span,
                cancel,
            )
            .await?;

            // Checkpoint so a crash between versions keeps what was recorded.
            info.save(root).await?;
        }

        Ok(())
    }

    async fn write_version(
        &self,
        root: &Path,
        version: &ModVersion,
        binary_type: BinaryType,
        paths: &mut Vec<String>,
        span: ProgressSpan<'_>,
        cancel: &CancelFlag,
    ) -> ManagerResult<()> {
        let total = version.compatible_files_count(binary_type).max(1) as f64;

        for (i, file) in version.downloads(binary_type).enumerate() {
            cancel.check()?;
            let file_span = span.sub(i as f64 / total, 1.0 / total);
            let download = self.source.open(&file.url).await?;

            match file.file_type {
                FileType::Normal => {
                    let relative = safe_relative_path(file.path.as_deref().unwrap_or_default())?;
                    let dest = root.join(&relative);
                    paths.push(relative);
                    download.write_to(&dest, file_span, cancel).await?;
                }
                FileType::Zip => {
                    let bytes = download
                        .into_bytes(file_span.sub(0.0, ZIP_DOWNLOAD_SHARE), cancel)
                        .await?;
                    extract_zip(
                        &bytes,
                        root,
                        EscapePolicy::Reject,
                        file_span.sub(ZIP_DOWNLOAD_SHARE, 1.0 - ZIP_DOWNLOAD_SHARE),
                        cancel,
                        paths,
                    )?;
                }
            }
        }

        span.set(1.0);
        info!("Installed {} ({} paths)", version.key(), paths.len());
        Ok(())
    }
}
