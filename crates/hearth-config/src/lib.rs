//! Configuration system for the Hearth session cache.
//!
//! Provides TOML-based configuration with:
//! - `[session]`, `[session.id]` and `[cluster]` sections that feed
//!   `hearth_session::ManagerConfig` through the `hearth-types` provider traits
//! - Config file layering (XDG user config + project-local overrides)
//! - `[logging]` settings and a `tracing` subscriber built from them

pub mod discovery;
pub mod error;
pub mod logging;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use logging::init_tracing;
pub use types::*;
