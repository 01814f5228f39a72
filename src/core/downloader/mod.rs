mod client;

pub use client::{Download, FileSource, HttpFileSource};

#[cfg(test)]
pub use client::testing;
