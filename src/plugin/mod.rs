//! Federated plugin composition.
//!
//! Plugins are built and versioned independently of the host. At startup
//! the host lists the available plugins, fetches each one's module bundle
//! and slots its components into fixed extension points, without rebuilding.
//!
//! # Architecture
//!
//! - [`manifest`]: untrusted manifest JSON into [`PluginDescriptor`]s
//! - [`Loader`]: remote ([`RemoteLoader`]) or local ([`LocalDevLoader`])
//!   module loading behind one trait
//! - [`PluginRegistry`]: entries bucketed by `(area, type)`
//! - [`Orchestrator`]: catalog to registry, one task per plugin
//! - [`ExtensionResolver`]: what the host UI reads
//!
//! State contributed by plugins goes through [`crate::store`].
//!
//! # Example Manifest
//!
//! ```json
//! {
//!   "name": "stock-donor",
//!   "version": "1.0",
//!   "components": [{ "area": "Toolbar", "type": "None", "module": "./Widget.js" }],
//!   "dependencies": { "omSupplyVersion": ">=2.0.0" }
//! }
//! ```

mod catalog;
pub mod discovery;
mod error;
mod loader;
pub mod manifest;
mod module;
mod orchestrator;
mod registry;
mod resolver;
mod types;

#[cfg(feature = "remote")]
pub use catalog::HttpCatalog;
pub use catalog::{CatalogEntry, CatalogSource, StaticCatalog};
pub use discovery::{discover_local, LocalDiscovery, LocalPlugin, LocalWorkspace};
pub use error::{ParseError, PluginError, PluginResult, UnknownExtensionKind};
#[cfg(feature = "remote")]
pub use loader::RemoteLoader;
pub use loader::{CoalescingLoader, LocalDevLoader, Loader};
pub use manifest::{PluginComponentSpec, PluginManifest};
pub use module::{
    hex_digest, BundleInstantiator, BundleModule, ExtensionModule, FactoryInstantiator,
    ModuleBundle, ModuleFactory, ModuleInstantiator,
};
pub use orchestrator::{CompositionReport, Orchestrator, PluginFailure};
pub use registry::{EntryState, PluginRegistry, RegistryEntry};
pub use resolver::ExtensionResolver;
pub use types::{
    Area, ComponentType, ExtensionPoint, LoadMode, PluginDescriptor, HOST_VERSION, MANIFEST_FILE,
    MODE_ENV_VAR,
};
