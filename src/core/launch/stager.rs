// ─── Launch Stager ───
// Assembles a profile's mods into a private staging tree and starts the game
// against it. Nothing is written into the game directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::doorstop::DoorstopConfig;
use crate::core::cache::{ArtifactCache, CacheRecord};
use crate::core::catalog::{safe_relative_path, BinaryType, CatalogClient};
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::game::{GameEnvironment, GameWatch};
use crate::core::profile::Profile;
use crate::core::progress::{CancelFlag, Progress, ProgressRun, ProgressSpan};
use crate::core::resolver::resolve;

/// Share of staging progress spent filling the cache; the rest is copying.
const CACHE_SHARE: f64 = 0.8;

pub struct LaunchStager {
    cache: Arc<ArtifactCache>,
    staging_root: PathBuf,
    gate: Mutex<()>,
}

impl LaunchStager {
    pub fn new(cache: Arc<ArtifactCache>, staging_root: PathBuf) -> Self {
        Self {
            cache,
            staging_root,
            gate: Mutex::new(()),
        }
    }

    pub fn staging_dir(&self, profile_id: &str) -> ManagerResult<PathBuf> {
        Ok(self.staging_root.join(safe_relative_path(profile_id)?))
    }

    /// Resolve, cache and stage `profile`, then start the game against it.
    ///
    /// Fails with `AlreadyRunning` while another launch is being prepared and
    /// with `GameRunning` while the game is up.
    pub async fn launch(
        &self,
        profile: &Profile,
        catalog: &dyn CatalogClient,
        env: &dyn GameEnvironment,
        watch: &GameWatch,
        progress: Option<&dyn Progress>,
        cancel: &CancelFlag,
    ) -> ManagerResult<PathBuf> {
        let _gate = self
            .gate
            .try_lock()
            .map_err(|_| ManagerError::AlreadyRunning)?;
        watch.ensure_not_running()?;
        let run = ProgressRun::start(progress)?;

        let staging = self
            .stage(profile, catalog, env.binary_type(), run.span(), cancel)
            .await?;
        env.launch(&staging).await?;

        info!("Launched profile '{}' from {:?}", profile.name, staging);
        Ok(staging)
    }

    /// Build `<staging_root>/<profile id>` from scratch and return its path.
    pub async fn stage(
        &self,
        profile: &Profile,
        catalog: &dyn CatalogClient,
        binary_type: BinaryType,
        span: ProgressSpan<'_>,
        cancel: &CancelFlag,
    ) -> ManagerResult<PathBuf> {
        let staging = self.staging_dir(&profile.id)?;
        let versions = resolve(&profile.versions, catalog).await?.versions();
        info!(
            "Staging profile '{}' ({} versions) at {:?}",
            profile.name,
            versions.len(),
            staging
        );

        let count = versions.len().max(1) as f64;
        let cache_span = span.sub(0.0, CACHE_SHARE);
        let mut records = Vec::with_capacity(versions.len());
        for (i, version) in versions.iter().enumerate() {
            cancel.check()?;
            let record = self
                .cache
                .download(
                    version,
                    binary_type,
                    cache_span.sub(i as f64 / count, 1.0 / count),
                    cancel,
                )
                .await?;
            records.push((version, record));
        }

        recreate_dir(&staging).await?;

        let copy_span = span.sub(CACHE_SHARE, 1.0 - CACHE_SHARE);
        for (i, (version, record)) in records.iter().enumerate() {
            cancel.check()?;
            let source = self.cache.version_dir(version)?;
            copy_files(&source, &staging, record, cancel).await?;
            debug!("Staged {} ({} files)", version.key(), record.files.len());
            copy_span.set((i + 1) as f64 / count);
        }

        DoorstopConfig::for_staging(&staging)?
            .write(&staging)
            .await?;

        span.set(1.0);
        Ok(staging)
    }
}

async fn recreate_dir(dir: &Path) -> ManagerResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ManagerError::io(dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ManagerError::io(dir, e))
}

/// Copy the files listed in `record` from `from` into `to`, overwriting collisions.
async fn copy_files(
    from: &Path,
    to: &Path,
    record: &CacheRecord,
    cancel: &CancelFlag,
) -> ManagerResult<()> {
    for file in &record.files {
        cancel.check()?;
        let relative = safe_relative_path(&file.path)?;
        let dest = to.join(&relative);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ManagerError::io(parent, e))?;
        }
        tokio::fs::copy(from.join(&relative), &dest)
            .await
            .map_err(|e| ManagerError::io(&dest, e))?;
    }
    Ok(())
}
