mod inspector;
mod installer;
pub mod manifest;
mod uninstall;

pub use inspector::{status, InstallState, InstallationStatus, OutdatedMod};
pub use installer::{InstallTarget, Installer};
pub use manifest::{
    InstallStatus, InstallationInfo, InstalledModInfo, CURRENT_FILE_VERSION, MANIFEST_FILE,
};
pub use uninstall::KeepSet;
