use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the mod manager core.
/// Every module returns `Result<T, ManagerError>`.
#[derive(Debug, Error)]
pub enum ManagerError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Path escapes the target root: {0}")]
    PathEscape(String),

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Truncated body from {url}: expected {expected} bytes, got {received}")]
    TruncatedBody {
        url: String,
        expected: u64,
        received: u64,
    },

    // ── Catalog ─────────────────────────────────────────
    #[error("Mod not found: {0}")]
    ModNotFound(String),

    #[error("Mod version not found: {mod_id}@{version_id}")]
    VersionNotFound { mod_id: String, version_id: String },

    #[error("Invalid catalog entry {key}: {reason}")]
    InvalidCatalogEntry { key: String, reason: String },

    // ── Resolver ────────────────────────────────────────
    #[error("Conflicting mods selected: {}", format_conflicts(.0))]
    Conflict(Vec<(String, String)>),

    #[error("Dependency cycle through {0}")]
    Cycle(String),

    // ── Installation ────────────────────────────────────
    #[error("Invalid installation manifest: {0}")]
    InvalidManifest(String),

    #[error("Installation manifest version {found} is newer than supported version {supported}")]
    UnsupportedManifestVersion { found: u32, supported: u32 },

    #[error("{0} is not compatible with this game installation")]
    Incompatible(String),

    #[error("Game is running")]
    GameRunning,

    #[error("Another install or launch is already in progress")]
    AlreadyRunning,

    #[error("Operation cancelled")]
    Cancelled,

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Archive ─────────────────────────────────────────
    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Profiles ────────────────────────────────────────
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Caller-facing classification of a [`ManagerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidManifest,
    Incompatible,
    Conflict,
    Cycle,
    NetworkError,
    IoError,
    GameRunning,
    AlreadyRunning,
    Cancelled,
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::ModNotFound(_)
            | ManagerError::VersionNotFound { .. }
            | ManagerError::ProfileNotFound(_) => ErrorKind::NotFound,
            ManagerError::InvalidManifest(_)
            | ManagerError::UnsupportedManifestVersion { .. }
            | ManagerError::InvalidCatalogEntry { .. }
            | ManagerError::Json(_) => ErrorKind::InvalidManifest,
            ManagerError::Incompatible(_) => ErrorKind::Incompatible,
            ManagerError::Conflict(_) => ErrorKind::Conflict,
            ManagerError::Cycle(_) => ErrorKind::Cycle,
            ManagerError::Http(_)
            | ManagerError::DownloadFailed { .. }
            | ManagerError::TruncatedBody { .. } => ErrorKind::NetworkError,
            ManagerError::Io { .. }
            | ManagerError::PathEscape(_)
            | ManagerError::Zip(_)
            | ManagerError::Other(_) => ErrorKind::IoError,
            ManagerError::GameRunning => ErrorKind::GameRunning,
            ManagerError::AlreadyRunning => ErrorKind::AlreadyRunning,
            ManagerError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Attach a path to an IO error built from a bare `std::io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ManagerError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for ManagerError {
    fn from(source: std::io::Error) -> Self {
        ManagerError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

fn format_conflicts(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(version, conflicting)| format!("({} conflicts with {})", version, conflicting))
        .collect::<Vec<_>>()
        .join(", ")
}
