// ─── Unity Mod Manager Core ───
// Catalog-driven mod installation for Unity games.
//
// Architecture:
//   core/
//     catalog/      - Catalog model, REST and local-file clients
//     resolver/     - Dependency closure, conflicts, cycles
//     downloader/   - Streamed file bodies with progress and cancellation
//     cache/        - Per-version artifact cache with SHA-256 records
//     installation/ - Manifest, install/uninstall, status inspection
//     profile/      - Named mod selections persisted as JSON
//     launch/       - Staging tree + doorstop config, game launch
//     game/         - Game environment and running-process watch
//     state/        - Paths, settings and the application root

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod downloader;
pub mod error;
pub mod game;
pub mod http;
pub mod installation;
pub mod launch;
pub mod profile;
pub mod progress;
pub mod resolver;
pub mod state;
