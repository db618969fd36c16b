//! Shared types for the Hearth session cache.

pub mod config;

pub use config::{
    ConfigProvider, HasClusterConfig, HasIdentifierConfig, HasSessionConfig, SavePolicy,
    SessionConfigProvider, defaults as config_defaults,
};
