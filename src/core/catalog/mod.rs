mod client;
mod local;
pub mod model;
mod rest;

pub use client::{
    page_limit, require_version, CatalogClient, HealthStatus, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use local::{CatalogExport, ExportedMod, LocalCatalog};
pub use model::{
    safe_relative_path, BinaryType, DependencyType, FileType, LauncherKind, Mod, ModDependency,
    ModFile, ModPack, ModType, ModVersion,
};
pub use rest::RestCatalog;

/// Production catalog server.
pub const DEFAULT_SERVER_URL: &str = "https://mods.unity-mods.dev/api";
