#![forbid(unsafe_code)]

mod loader;
mod types;

pub use loader::load_from_env;
pub use types::{Config, Distribution, FaultProfile};
