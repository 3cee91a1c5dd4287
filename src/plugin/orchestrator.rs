//! Plugin composition.
//!
//! The [`Orchestrator`] fetches the catalog, then composes every listed
//! plugin in its own task: parse the manifest, check host compatibility,
//! load each component module, register the entries, attach the state
//! slice. A failure at any stage skips that plugin only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use serde::Serialize;
use tracing::Instrument;

use super::{
    BundleInstantiator, CatalogEntry, CatalogSource, CoalescingLoader, ExtensionResolver,
    LoadMode, Loader, LocalDevLoader, LocalWorkspace, ModuleInstantiator, PluginError,
    PluginManifest, PluginRegistry, PluginResult, RegistryEntry, HOST_VERSION,
};
use crate::core::PluginsConfig;
use crate::store::{HostStore, ReducerSlice};

/// A plugin that did not make it into the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginFailure {
    /// Plugin name, or the catalog path when the name is unknown.
    pub plugin: String,
    pub reason: String,
}

impl PluginFailure {
    fn new(plugin: impl Into<String>, reason: impl ToString) -> Self {
        Self { plugin: plugin.into(), reason: reason.to_string() }
    }
}

/// Outcome of one [`Orchestrator::initialize`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompositionReport {
    /// Plugins registered by this call, sorted.
    pub registered: Vec<String>,
    /// Plugins whose load or registration failed.
    pub failed: Vec<PluginFailure>,
    /// Manifests rejected before loading.
    pub skipped: Vec<PluginFailure>,
    /// Plugins removed because they left the catalog or their manifest is
    /// now rejected.
    pub pruned: Vec<String>,
    /// Set when the catalog itself could not be fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_error: Option<String>,
}

impl CompositionReport {
    /// True when every listed plugin was registered.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && self.catalog_error.is_none()
    }
}

/// What a composition task produced for one catalog entry.
enum Outcome {
    Registered { path: String, name: String, slice: Option<String> },
    Skipped { path: String, failure: PluginFailure },
    Failed(PluginFailure),
}

/// Record of a plugin composed by an earlier call.
#[derive(Debug, Clone)]
struct Composed {
    name: String,
    slice: Option<String>,
}

#[derive(Default)]
struct CompositionState {
    /// Keyed by catalog path.
    composed: HashMap<String, Composed>,
}

/// Everything a composition task needs, cloned into each task.
#[derive(Clone)]
struct Pipeline {
    registry: Arc<PluginRegistry>,
    store: Arc<dyn HostStore>,
    loader: Arc<dyn Loader>,
    host_version: semver::Version,
}

/// Drives plugin composition into a registry and a host store.
///
/// Calls to [`initialize`](Self::initialize) are serialized, and repeating
/// one never duplicates registry entries.
pub struct Orchestrator {
    pipeline: Pipeline,
    guard: tokio::sync::Mutex<CompositionState>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("mode", &self.pipeline.loader.mode())
            .field("host_version", &self.pipeline.host_version.to_string())
            .field("registry", &self.pipeline.registry)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(registry: Arc<PluginRegistry>, store: Arc<dyn HostStore>, loader: Arc<dyn Loader>) -> Self {
        let host_version =
            semver::Version::parse(HOST_VERSION).unwrap_or_else(|_| semver::Version::new(0, 0, 0));

        Self {
            pipeline: Pipeline { registry, store, loader, host_version },
            guard: tokio::sync::Mutex::new(CompositionState::default()),
        }
    }

    /// Check manifests against `version` instead of the composer's own.
    pub fn with_host_version(mut self, version: semver::Version) -> Self {
        self.pipeline.host_version = version;
        self
    }

    /// Build an orchestrator and the matching catalog from configuration.
    ///
    /// Remote mode pairs the HTTP catalog with the remote loader; local mode
    /// pairs a [`LocalWorkspace`] with the local dev loader. Either loader is
    /// wrapped to coalesce duplicate loads and enforce the load timeout.
    pub fn from_config(
        config: &PluginsConfig,
        registry: Arc<PluginRegistry>,
        store: Arc<dyn HostStore>,
        instantiator: Arc<dyn ModuleInstantiator>,
    ) -> PluginResult<(Self, Arc<dyn CatalogSource>)> {
        let host_version = semver::Version::parse(config.host_version()).map_err(|e| {
            PluginError::Config(format!("invalid host version '{}': {e}", config.host_version()))
        })?;

        let (loader, catalog): (Arc<dyn Loader>, Arc<dyn CatalogSource>) = match config.mode {
            LoadMode::Local => {
                let workspace = Arc::new(LocalWorkspace::new(&config.local_root));
                let loader = LocalDevLoader::new(Arc::clone(&workspace), instantiator);
                (Arc::new(loader) as Arc<dyn Loader>, workspace as Arc<dyn CatalogSource>)
            }
            LoadMode::Remote => Self::remote_parts(config, instantiator)?,
        };

        tracing::info!(mode = %config.mode, catalog = %catalog.describe(), "Plugin composition configured");

        let mut loader = CoalescingLoader::new(loader);
        if config.load_timeout_secs > 0 {
            loader = loader.with_timeout(Duration::from_secs(config.load_timeout_secs));
        }

        let orchestrator =
            Self::new(registry, store, Arc::new(loader)).with_host_version(host_version);
        Ok((orchestrator, catalog))
    }

    #[cfg(feature = "remote")]
    fn remote_parts(
        config: &PluginsConfig,
        instantiator: Arc<dyn ModuleInstantiator>,
    ) -> PluginResult<(Arc<dyn Loader>, Arc<dyn CatalogSource>)> {
        let loader = super::RemoteLoader::new(&config.host_url, instantiator)?;
        let catalog = super::HttpCatalog::new(config.catalog_url())?;
        Ok((Arc::new(loader) as Arc<dyn Loader>, Arc::new(catalog) as Arc<dyn CatalogSource>))
    }

    #[cfg(not(feature = "remote"))]
    fn remote_parts(
        _config: &PluginsConfig,
        _instantiator: Arc<dyn ModuleInstantiator>,
    ) -> PluginResult<(Arc<dyn Loader>, Arc<dyn CatalogSource>)> {
        Err(PluginError::Config("remote mode requires the 'remote' feature".to_string()))
    }

    /// Shorthand for [`from_config`](Self::from_config) with bundle modules.
    pub fn from_config_default(
        config: &PluginsConfig,
        registry: Arc<PluginRegistry>,
        store: Arc<dyn HostStore>,
    ) -> PluginResult<(Self, Arc<dyn CatalogSource>)> {
        Self::from_config(config, registry, store, Arc::new(BundleInstantiator))
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.pipeline.registry
    }

    pub fn mode(&self) -> LoadMode {
        self.pipeline.loader.mode()
    }

    pub fn host_version(&self) -> &semver::Version {
        &self.pipeline.host_version
    }

    /// A resolver reading from this orchestrator's registry.
    pub fn resolver(&self) -> ExtensionResolver {
        ExtensionResolver::new(Arc::clone(&self.pipeline.registry))
    }

    /// Compose every plugin the catalog lists.
    ///
    /// Never fails: catalog and per-plugin problems are logged and reported.
    /// Plugins composed by an earlier call that are no longer listed, or
    /// whose manifest is now rejected, are removed from the registry and the
    /// store. A plugin that is listed but fails to load keeps its previous
    /// registration.
    pub async fn initialize(&self, catalog: &dyn CatalogSource) -> CompositionReport {
        let mut state = self.guard.lock().await;
        let mut report = CompositionReport::default();

        let entries = match catalog.list().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(catalog = %catalog.describe(), error = %e, "Failed to fetch plugin catalog");
                report.catalog_error = Some(e.to_string());
                return report;
            }
        };

        tracing::info!(count = entries.len(), "Composing plugins");

        let listed: HashSet<String> = entries.iter().map(|e| e.path.clone()).collect();
        let tasks = entries.into_iter().map(|entry| {
            let path = entry.path.clone();
            let span = tracing::info_span!("plugin", path = %entry.path);
            let handle = tokio::spawn(self.pipeline.clone().compose(entry).instrument(span));
            (path, handle)
        });
        let (paths, handles): (Vec<String>, Vec<_>) = tasks.unzip();

        let mut rejected = HashSet::new();
        for (path, joined) in paths.into_iter().zip(join_all(handles).await) {
            let outcome = joined.unwrap_or_else(|e| {
                let error = if e.is_panic() {
                    PluginError::Panicked(path.clone())
                } else {
                    PluginError::LoadError(format!("composition task cancelled: {e}"))
                };
                tracing::error!(path = %path, error = %error, "Plugin composition task failed");
                Outcome::Failed(PluginFailure::new(path.clone(), &error))
            });

            match outcome {
                Outcome::Registered { path, name, slice } => {
                    report.registered.push(name.clone());
                    let previous = state.composed.insert(path, Composed { name: name.clone(), slice: slice.clone() });
                    if let Some(old) = previous.and_then(|p| p.slice).filter(|old| Some(old) != slice.as_ref()) {
                        self.pipeline.store.remove_reducer_owned(&old, &name);
                    }
                }
                Outcome::Skipped { path, failure } => {
                    report.skipped.push(failure);
                    rejected.insert(path);
                }
                Outcome::Failed(failure) => report.failed.push(failure),
            }
        }

        let stale: Vec<String> = state
            .composed
            .keys()
            .filter(|path| !listed.contains(*path) || rejected.contains(*path))
            .cloned()
            .collect();
        report.pruned = self.prune(&mut state, stale, &report.registered);
        report.registered.sort();
        report.registered.dedup();

        tracing::info!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            pruned = report.pruned.len(),
            "Plugin composition finished"
        );

        report
    }

    /// Drop the plugins composed from `stale` paths, unless the same name was
    /// registered again from another path in this round. A slice is only
    /// detached while the pruned plugin still owns it.
    fn prune(&self, state: &mut CompositionState, stale: Vec<String>, registered: &[String]) -> Vec<String> {
        let mut pruned = Vec::new();
        for path in stale {
            let Some(composed) = state.composed.remove(&path) else {
                continue;
            };
            if registered.contains(&composed.name) {
                continue;
            }

            tracing::info!(plugin = %composed.name, path = %path, "Removing stale plugin");
            self.pipeline.registry.remove(&composed.name);
            if let Some(key) = &composed.slice {
                self.pipeline.store.remove_reducer_owned(key, &composed.name);
            }
            pruned.push(composed.name);
        }

        pruned.sort();
        pruned
    }
}

impl Pipeline {
    async fn compose(self, entry: CatalogEntry) -> Outcome {
        let CatalogEntry { config, path } = entry;

        let manifest = match self.accept(&config) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping plugin manifest");
                let failure = PluginFailure::new(path.clone(), &e);
                return Outcome::Skipped { path, failure };
            }
        };

        let name = manifest.name.clone();
        let descriptors = manifest.descriptors(&path);
        if descriptors.is_empty() {
            tracing::warn!(plugin = %name, "Plugin has no usable components");
            let failure = PluginFailure::new(name, "no usable components");
            return Outcome::Skipped { path, failure };
        }

        let modules = match try_join_all(descriptors.iter().map(|d| self.loader.load(d))).await {
            Ok(modules) => modules,
            Err(e) => {
                tracing::error!(plugin = %name, error = %e, "Failed to load plugin");
                return Outcome::Failed(PluginFailure::new(name, &e));
            }
        };

        let reducer = modules.iter().find_map(|m| m.reducer());
        let entries: Vec<RegistryEntry> =
            descriptors.into_iter().zip(modules).map(|(d, m)| RegistryEntry::new(d, m)).collect();

        self.registry.register_plugin(&name, entries);
        tracing::info!(plugin = %name, version = %manifest.version, "Registered plugin");

        let slice = match (reducer, &manifest.slice) {
            (Some(reducer), declared) => {
                let key = declared.clone().unwrap_or_else(|| name.clone());
                self.store.add_reducer(ReducerSlice::new(key.clone(), reducer).owned_by(&name));
                tracing::debug!(plugin = %name, slice = %key, "Attached state slice");
                Some(key)
            }
            (None, Some(declared)) => {
                tracing::warn!(plugin = %name, slice = %declared, "Plugin declares a slice but exports no reducer");
                None
            }
            (None, None) => None,
        };

        Outcome::Registered { path, name, slice }
    }

    /// Parse, validate and host-check a manifest.
    fn accept(&self, config: &str) -> PluginResult<PluginManifest> {
        let manifest = PluginManifest::from_json(config)?;
        manifest.validate()?;
        manifest.check_host(&self.host_version)?;
        Ok(manifest)
    }
}
