//! Local development discovery.
//!
//! Scans a plugin checkout laid out as `plugins/{name}/frontend/latest/`.
//! Each `latest` directory holds a `plugin.json` manifest plus the module
//! files it references. Discovery produces both the catalog entries and the
//! local module namespace the [`LocalDevLoader`](super::LocalDevLoader)
//! resolves against.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use walkdir::WalkDir;

use super::{CatalogEntry, CatalogSource, PluginError, PluginResult, MANIFEST_FILE};

/// Directory under the workspace root holding the plugins.
pub const PLUGINS_DIR: &str = "plugins";

/// A plugin found on disk.
#[derive(Debug, Clone)]
pub struct LocalPlugin {
    /// Directory name under `plugins/`.
    pub name: String,
    /// The `frontend/latest` directory.
    pub dir: PathBuf,
    /// Raw manifest contents.
    pub manifest: String,
}

/// Result of a discovery scan.
#[derive(Debug, Default)]
pub struct LocalDiscovery {
    pub plugins: Vec<LocalPlugin>,
    /// Problems encountered while scanning, one line each.
    pub diagnostics: Vec<String>,
}

impl LocalDiscovery {
    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.plugins.iter().map(|p| CatalogEntry::new(p.manifest.clone(), p.name.clone())).collect()
    }
}

/// The frontend directory of plugin `name` under `root`.
pub fn plugin_dir(root: &Path, name: &str) -> PathBuf {
    root.join(PLUGINS_DIR).join(name).join("frontend").join("latest")
}

/// Scan `root/plugins` for plugin frontends.
pub fn discover_local(root: &Path) -> LocalDiscovery {
    let mut discovery = LocalDiscovery::default();
    let plugins_dir = root.join(PLUGINS_DIR);

    if !plugins_dir.is_dir() {
        tracing::debug!(dir = %plugins_dir.display(), "No local plugins directory");
        return discovery;
    }

    let walker = WalkDir::new(&plugins_dir).min_depth(1).max_depth(1).sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                discovery.diagnostics.push(format!("{}: {e}", plugins_dir.display()));
                continue;
            }
        };

        if !entry.file_type().is_dir() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let dir = plugin_dir(root, &name);
        if !dir.is_dir() {
            tracing::debug!(plugin = %name, "Plugin has no frontend/latest directory");
            continue;
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        match std::fs::read_to_string(&manifest_path) {
            Ok(manifest) => discovery.plugins.push(LocalPlugin { name, dir, manifest }),
            Err(e) => {
                discovery.diagnostics.push(format!("{}: {e}", manifest_path.display()));
            }
        }
    }

    discovery
}

/// A local plugin checkout used in development mode.
///
/// Every [`CatalogSource::list`] call rescans the checkout, so edits on
/// disk are picked up by the next composition.
#[derive(Debug)]
pub struct LocalWorkspace {
    root: PathBuf,
    namespace: RwLock<BTreeMap<String, PathBuf>>,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), namespace: RwLock::new(BTreeMap::new()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rescan the checkout and replace the module namespace.
    pub fn rescan(&self) -> LocalDiscovery {
        let discovery = discover_local(&self.root);
        self.install(&discovery);
        discovery
    }

    /// Directory serving modules for plugin `key`.
    pub fn resolve(&self, key: &str) -> Option<PathBuf> {
        self.namespace.read().get(key).cloned()
    }

    /// Names currently in the namespace.
    pub fn names(&self) -> Vec<String> {
        self.namespace.read().keys().cloned().collect()
    }

    fn install(&self, discovery: &LocalDiscovery) {
        for line in &discovery.diagnostics {
            tracing::warn!(diagnostic = %line, "Local plugin discovery problem");
        }

        let namespace: BTreeMap<String, PathBuf> =
            discovery.plugins.iter().map(|p| (p.name.clone(), p.dir.clone())).collect();
        *self.namespace.write() = namespace;
    }
}

#[async_trait]
impl CatalogSource for LocalWorkspace {
    async fn list(&self) -> PluginResult<Vec<CatalogEntry>> {
        let root = self.root.clone();
        let discovery = tokio::task::spawn_blocking(move || discover_local(&root))
            .await
            .map_err(|e| PluginError::LoadError(format!("local discovery failed: {e}")))?;

        self.install(&discovery);
        Ok(discovery.entries())
    }

    fn describe(&self) -> String {
        format!("local plugins at {}", self.root.display())
    }
}
