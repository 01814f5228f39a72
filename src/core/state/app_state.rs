use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use super::settings::ManagerSettings;
use crate::core::cache::ArtifactCache;
use crate::core::catalog::{CatalogClient, LocalCatalog, RestCatalog};
use crate::core::downloader::{FileSource, HttpFileSource};
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::game::{GameEnvironment, GameWatch, LocalGame, POLL_INTERVAL};
use crate::core::installation::{InstallTarget, Installer};
use crate::core::launch::LaunchStager;
use crate::core::profile::ProfileStore;

const APP_DIR_NAME: &str = "UnityModManager";

/// Overrides the per-user data root.
pub const HOME_ENV: &str = "UNITY_MODS_HOME";

/// Layout of the per-user data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `$UNITY_MODS_HOME`, or `<config dir>/UnityModManager`.
    pub fn from_env() -> Self {
        let root = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| default_base_dir().join(APP_DIR_NAME));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profiles_file(&self) -> PathBuf {
        self.root.join("profiles.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("mods")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join("profiles")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }
}

fn default_base_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Application root: owns every long-lived component and hands out references.
pub struct AppState {
    pub paths: AppPaths,
    pub settings: ManagerSettings,
    pub catalog: Arc<dyn CatalogClient>,
    pub game: Option<Arc<dyn GameEnvironment>>,
    pub watch: Arc<GameWatch>,
    pub installer: Installer,
    pub profiles: ProfileStore,
    pub cache: Arc<ArtifactCache>,
    pub stager: LaunchStager,
}

impl AppState {
    /// Wire the components together. Must run inside a tokio runtime when a
    /// game is given, since the watch polls on a background task.
    pub fn new(
        paths: AppPaths,
        settings: ManagerSettings,
        catalog: Arc<dyn CatalogClient>,
        source: Arc<dyn FileSource>,
        game: Option<Arc<dyn GameEnvironment>>,
    ) -> Self {
        let watch = Arc::new(match &game {
            Some(game) => GameWatch::spawn(game.clone(), POLL_INTERVAL),
            None => GameWatch::idle(),
        });

        let cache = Arc::new(ArtifactCache::new(paths.cache_dir(), source.clone()));
        let installer = Installer::new(source, watch.clone());
        let profiles = ProfileStore::new(paths.profiles_file());
        let stager = LaunchStager::new(cache.clone(), paths.staging_root());

        Self {
            paths,
            settings,
            catalog,
            game,
            watch,
            installer,
            profiles,
            cache,
            stager,
        }
    }

    /// Build the production wiring described by `settings`.
    pub async fn open(paths: AppPaths, settings: ManagerSettings) -> ManagerResult<Self> {
        let catalog = open_catalog(&settings).await?;
        let source: Arc<dyn FileSource> = Arc::new(HttpFileSource::new()?);
        let game = local_game(&settings)?.map(|g| Arc::new(g) as Arc<dyn GameEnvironment>);

        info!("Data directory: {:?}", paths.root());
        Ok(Self::new(paths, settings, catalog, source, game))
    }

    pub fn game(&self) -> ManagerResult<&dyn GameEnvironment> {
        self.game.as_deref().ok_or_else(|| {
            ManagerError::Other("No game directory configured; pass --game-root".into())
        })
    }

    pub async fn install_target(&self) -> ManagerResult<InstallTarget> {
        InstallTarget::from_env(self.game()?).await
    }
}

/// File-backed catalog when `catalog_file` is set, REST otherwise.
pub async fn open_catalog(settings: &ManagerSettings) -> ManagerResult<Arc<dyn CatalogClient>> {
    match &settings.catalog_file {
        Some(path) => Ok(Arc::new(LocalCatalog::load(path).await?)),
        None => {
            info!("Using catalog server {}", settings.server_url);
            Ok(Arc::new(RestCatalog::new(&settings.server_url)?))
        }
    }
}

/// The configured game, if any.
pub fn local_game(settings: &ManagerSettings) -> ManagerResult<Option<LocalGame>> {
    let Some(root) = &settings.game_root else {
        return Ok(None);
    };

    let executable = match &settings.game_executable {
        Some(exe) => exe.clone(),
        None => LocalGame::detect_executable(root).ok_or_else(|| {
            ManagerError::Other(format!(
                "Cannot find the game executable in {:?}; set game_executable in settings",
                root
            ))
        })?,
    };

    Ok(Some(LocalGame {
        root: root.clone(),
        executable,
        launcher: settings.launcher,
        binary_type: settings.binary_type,
        version: settings.game_version.clone(),
    }))
}
