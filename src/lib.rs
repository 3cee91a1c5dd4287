#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_self)]
#![allow(clippy::unnecessary_lazy_evaluations)]
#![allow(clippy::cast_possible_truncation)]

//! # Plugin Composer
//!
//! Runtime composition of independently built plugins into a host
//! application.
//!
//! The host publishes a fixed set of extension points (an area of the UI
//! plus a component type). Plugins ship a manifest declaring which
//! extension points they fill and where their modules live. At startup the
//! composer lists the available plugins, loads their modules and registers
//! them, and merges any state reducer a plugin exports into the host store.
//!
//! ## Features
//!
//! - **Isolated composition**: one broken plugin never blocks the others
//! - **Two load modes**: bundles from a plugin host, or a local checkout
//! - **Idempotent reloads**: re-running composition replaces, never duplicates
//! - **Pluggable state**: plugin reducers attach to named store slices
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use plugin_composer::core::Config;
//! use plugin_composer::plugin::{Area, ComponentType, Orchestrator, PluginRegistry};
//! use plugin_composer::store::Store;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let registry = Arc::new(PluginRegistry::new());
//! let store = Arc::new(Store::new());
//!
//! let (orchestrator, catalog) =
//!     Orchestrator::from_config_default(&config.plugins, registry, store)?;
//! let report = orchestrator.initialize(catalog.as_ref()).await;
//! println!("{} plugins registered", report.registered.len());
//!
//! let toolbar = orchestrator.resolver().get(Area::Toolbar, ComponentType::None);
//! # let _ = toolbar;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::use_self)]

pub mod core;
pub mod plugin;
pub mod store;

// Re-export commonly used types
pub use core::Config;
pub use plugin::{
    Area, CompositionReport, ComponentType, ExtensionModule, ExtensionResolver, Orchestrator,
    PluginDescriptor, PluginError, PluginRegistry, PluginResult,
};
pub use store::{Action, HostStore, Store};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "plugin-composer";
