//! Core application services.
//!
//! Currently this is the configuration layer shared by the library and the
//! command-line front end.

mod config;

pub use config::{Config, PluginsConfig, LOCAL_CONFIG_FILE};
