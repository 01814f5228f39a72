pub mod model;
pub mod store;

pub use model::Profile;
pub use store::ProfileStore;
