pub mod doorstop;
pub mod stager;

pub use doorstop::{DoorstopConfig, DOORSTOP_CONFIG_FILE};
pub use stager::LaunchStager;
