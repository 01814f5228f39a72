use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use unity_mod_manager_lib::core::catalog::{
    require_version, BinaryType, CatalogClient, LauncherKind, ModVersion,
};
use unity_mod_manager_lib::core::error::{ManagerError, ManagerResult};
use unity_mod_manager_lib::core::installation::{self, KeepSet};
use unity_mod_manager_lib::core::profile::Profile;
use unity_mod_manager_lib::core::progress::{CancelFlag, Progress, ProgressTracker};
use unity_mod_manager_lib::core::resolver::resolve;
use unity_mod_manager_lib::core::state::{AppPaths, AppState, ManagerSettings};

#[derive(Parser)]
#[command(name = "unity-mods", version, about = "Install and launch mods for Unity games")]
struct Cli {
    /// Use a catalog export file instead of the server.
    #[arg(long, global = true, conflicts_with = "server")]
    local: Option<PathBuf>,

    /// Catalog server base URL.
    #[arg(long, global = true)]
    server: Option<String>,

    #[arg(long, global = true)]
    game_root: Option<PathBuf>,

    #[arg(long, global = true)]
    launcher: Option<LauncherKind>,

    #[arg(long = "binary", global = true)]
    binary_type: Option<BinaryType>,

    #[arg(long, global = true)]
    game_version: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show catalog server health.
    Health,
    /// List catalog mods.
    Mods {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        after: Option<String>,
        /// Include libraries.
        #[arg(long)]
        all: bool,
    },
    /// List versions of a mod, newest first.
    Versions {
        mod_id: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        after: Option<String>,
    },
    /// Print the dependency closure of `mod[@version]` selections.
    Resolve {
        #[arg(required = true)]
        selections: Vec<String>,
    },
    /// Install exactly the closure of the selections into the game directory.
    Install {
        #[arg(required = true)]
        selections: Vec<String>,
    },
    /// Remove installed mods; `--keep mod@version` keeps those.
    Uninstall {
        #[arg(long)]
        keep: Vec<String>,
    },
    /// Show the installation state of the game directory.
    Status {
        #[arg(long)]
        check_updates: bool,
    },
    /// Manage launch profiles.
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
    /// Stage a profile and start the game with it.
    Launch { profile_id: String },
    /// Drop every cached version of a mod.
    Prune { mod_id: String },
}

#[derive(Subcommand)]
enum ProfileCommand {
    List,
    Create { name: String },
    /// Select `mod[@version]` in a profile.
    Add { profile_id: String, selection: String },
    Remove { profile_id: String, mod_id: String },
    Delete { profile_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,unity_mod_manager_lib=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ManagerResult<()> {
    let paths = AppPaths::from_env();
    let mut settings = ManagerSettings::load(&paths.settings_file());
    apply_overrides(&cli, &mut settings);

    let state = AppState::open(paths, settings).await?;
    let state = &state;
    let catalog = state.catalog.as_ref();

    match cli.command {
        Command::Health => print_json(&catalog.get_health().await?),
        Command::Mods { limit, after, all } => {
            let mods: Vec<_> = catalog
                .get_mod_list(limit, after.as_deref(), None)
                .await?
                .into_iter()
                .filter(|m| all || m.is_listed())
                .collect();
            print_json(&mods)
        }
        Command::Versions {
            mod_id,
            limit,
            after,
        } => print_json(
            &catalog
                .get_mod_versions(&mod_id, limit, after.as_deref())
                .await?,
        ),
        Command::Resolve { selections } => {
            let initial = lookup_all(catalog, &selections).await?;
            let resolution = resolve(&initial, catalog).await?;
            let summary: Vec<String> = resolution.as_map().values().map(ModVersion::key).collect();
            print_json(&summary)
        }
        Command::Install { selections } => {
            ensure_app_enabled(catalog).await?;
            let initial = lookup_all(catalog, &selections).await?;
            let versions = resolve(&initial, catalog).await?.versions();
            let target = state.install_target().await?;

            let info = with_progress(|progress, cancel| async move {
                state
                    .installer
                    .install(&target, &versions, Some(&*progress as &dyn Progress), &cancel)
                    .await
            })
            .await?;
            print_json(&info)
        }
        Command::Uninstall { keep } => {
            ensure_app_enabled(catalog).await?;
            let keep = keep
                .iter()
                .map(|s| match parse_selection(s) {
                    (mod_id, Some(version)) => Ok((mod_id, version)),
                    (mod_id, None) => Err(ManagerError::Other(format!(
                        "--keep needs mod@version, got '{}'",
                        mod_id
                    ))),
                })
                .collect::<ManagerResult<KeepSet>>()?;
            let root = state.game()?.game_root().to_path_buf();

            let left = with_progress(|progress, cancel| async move {
                state
                    .installer
                    .uninstall(&root, Some(&*progress as &dyn Progress), &keep, &cancel)
                    .await
            })
            .await?;
            print_json(&left)
        }
        Command::Status { check_updates } => {
            let game = state.game()?;
            let game_version = game.game_version().await?;
            let status =
                installation::status(game.game_root(), &game_version, check_updates, catalog)
                    .await?;
            print_json(&status)
        }
        Command::Profile { action } => run_profile(state, action).await,
        Command::Launch { profile_id } => {
            ensure_app_enabled(catalog).await?;
            let profile = state.profiles.get(&profile_id).await?;
            let game = state.game()?;

            let staging = with_progress(|progress, cancel| async move {
                state
                    .stager
                    .launch(
                        &profile,
                        catalog,
                        game,
                        &state.watch,
                        Some(&*progress as &dyn Progress),
                        &cancel,
                    )
                    .await
            })
            .await?;
            info!("Game started from {:?}", staging);
            Ok(())
        }
        Command::Prune { mod_id } => state.cache.prune(&mod_id).await,
    }
}

async fn run_profile(state: &AppState, action: ProfileCommand) -> ManagerResult<()> {
    let catalog = state.catalog.as_ref();

    match action {
        ProfileCommand::List => print_json(&state.profiles.list().await?),
        ProfileCommand::Create { name } => {
            let profile = state.profiles.add_or_replace(Profile::new(name)).await?;
            print_json(&profile)
        }
        ProfileCommand::Add {
            profile_id,
            selection,
        } => {
            let mut profile = state.profiles.get(&profile_id).await?;
            let (mod_id, version_id) = parse_selection(&selection);
            profile.select(require_version(catalog, &mod_id, version_id.as_deref()).await?);
            print_json(&state.profiles.add_or_replace(profile).await?)
        }
        ProfileCommand::Remove { profile_id, mod_id } => {
            let mut profile = state.profiles.get(&profile_id).await?;
            if !profile.deselect(&mod_id) {
                return Err(ManagerError::ModNotFound(mod_id));
            }
            print_json(&state.profiles.add_or_replace(profile).await?)
        }
        ProfileCommand::Delete { profile_id } => state.profiles.remove(&profile_id).await,
    }
}

fn apply_overrides(cli: &Cli, settings: &mut ManagerSettings) {
    if let Some(path) = &cli.local {
        settings.catalog_file = Some(path.clone());
    }
    if let Some(url) = &cli.server {
        settings.server_url = url.clone();
        settings.catalog_file = None;
    }
    if let Some(root) = &cli.game_root {
        settings.game_root = Some(root.clone());
    }
    if let Some(launcher) = cli.launcher {
        settings.launcher = launcher;
    }
    if let Some(binary_type) = cli.binary_type {
        settings.binary_type = binary_type;
    }
    if let Some(version) = &cli.game_version {
        settings.game_version = Some(version.clone());
    }
}

/// Split `mod[@version]`.
fn parse_selection(raw: &str) -> (String, Option<String>) {
    match raw.split_once('@') {
        Some((mod_id, version)) if !version.is_empty() => {
            (mod_id.to_string(), Some(version.to_string()))
        }
        Some((mod_id, _)) => (mod_id.to_string(), None),
        None => (raw.to_string(), None),
    }
}

async fn lookup_all(
    catalog: &dyn CatalogClient,
    selections: &[String],
) -> ManagerResult<Vec<ModVersion>> {
    let mut versions = Vec::with_capacity(selections.len());
    for raw in selections {
        let (mod_id, version_id) = parse_selection(raw);
        versions.push(require_version(catalog, &mod_id, version_id.as_deref()).await?);
    }
    Ok(versions)
}

/// Refuse to mutate anything when the server has disabled this app version.
async fn ensure_app_enabled(catalog: &dyn CatalogClient) -> ManagerResult<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    match catalog.get_health().await {
        Ok(health) if health.is_version_disabled(app_version) => Err(ManagerError::Other(format!(
            "Version {} is disabled by the catalog server; please update",
            app_version
        ))),
        Ok(_) => Ok(()),
        Err(e) => {
            warn!("Health check failed, continuing: {}", e);
            Ok(())
        }
    }
}

/// Run a long operation with a logged progress bar and Ctrl-C cancellation.
async fn with_progress<T, F, Fut>(op: F) -> ManagerResult<T>
where
    F: FnOnce(Arc<ProgressTracker>, CancelFlag) -> Fut,
    Fut: std::future::Future<Output = ManagerResult<T>>,
{
    let tracker = Arc::new(ProgressTracker::new());
    let cancel = CancelFlag::new();

    let on_interrupt = cancel.clone();
    let interrupt: JoinHandle<()> = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling...");
            on_interrupt.cancel();
        }
    });

    let observed = tracker.clone();
    let reporter: JoinHandle<()> = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            ticker.tick().await;
            if observed.is_active() {
                info!("Progress: {:.0}%", observed.get_value() * 100.0);
            }
        }
    });

    let result = op(tracker, cancel).await;
    interrupt.abort();
    reporter.abort();
    result
}

fn print_json<T: Serialize>(value: &T) -> ManagerResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
