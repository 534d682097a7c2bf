//! Local files: client configuration and persisted properties.

pub mod aux_store;
pub mod config;

pub use aux_store::FileAuxStore;
pub use config::{load_config, ClientConfig, ConfigError};
