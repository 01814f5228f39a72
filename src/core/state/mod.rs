pub mod app_state;
pub mod settings;

pub use app_state::{local_game, open_catalog, AppPaths, AppState, HOME_ENV};
pub use settings::ManagerSettings;
