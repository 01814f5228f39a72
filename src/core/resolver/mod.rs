mod resolver;

pub use resolver::{resolve, ModResolver, Resolution};
