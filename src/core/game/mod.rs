mod environment;
mod watch;

pub use environment::{GameEnvironment, LocalGame, DOORSTOP_CONFIG_ENV};
pub use watch::{GameWatch, POLL_INTERVAL};

#[cfg(test)]
pub use environment::testing;
