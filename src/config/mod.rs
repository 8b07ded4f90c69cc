//! Configuration module.

mod loader;
mod settings;
mod types;

pub use loader::*;
pub use settings::*;
pub use types::*;
