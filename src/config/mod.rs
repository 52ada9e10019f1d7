//! Daemon bootstrap configuration and the runtime configuration surface of
//! spec.md §6, loaded from CLI flags layered under an optional TOML/JSON
//! file, following the teacher's `config/loader.rs` shape.

mod loader;
mod types;

pub use loader::load_config;
pub use types::{ConfigEntry, ConfigFile, DaemonConfig, RuntimeConfig};
