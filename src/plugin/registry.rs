//! Registry of composed plugin extensions.
//!
//! Entries are bucketed by [`ExtensionPoint`]. Inside a bucket a plugin name
//! appears at most once and insertion order is preserved, so host UIs render
//! contributions in a stable order across reloads.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{Area, ComponentType, ExtensionModule, ExtensionPoint, PluginDescriptor};

/// A descriptor paired with its loaded module.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub descriptor: PluginDescriptor,
    pub module: Arc<dyn ExtensionModule>,
    /// When the entry was (re)registered.
    pub registered_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn new(descriptor: PluginDescriptor, module: Arc<dyn ExtensionModule>) -> Self {
        Self { descriptor, module, registered_at: Utc::now() }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn extension_point(&self) -> ExtensionPoint {
        self.descriptor.extension_point()
    }
}

/// Lifecycle of a plugin name in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Registered,
    /// Removed; only a fresh `add` brings it back.
    Removed,
}

#[derive(Default)]
struct RegistryInner {
    buckets: BTreeMap<ExtensionPoint, Vec<RegistryEntry>>,
    status: HashMap<String, EntryState>,
}

impl RegistryInner {
    fn upsert(&mut self, entry: RegistryEntry) {
        self.status.insert(entry.descriptor.name.clone(), EntryState::Registered);

        let bucket = self.buckets.entry(entry.extension_point()).or_default();
        match bucket.iter_mut().find(|e| e.descriptor.name == entry.descriptor.name) {
            Some(existing) => *existing = entry,
            None => bucket.push(entry),
        }
    }

    fn purge(&mut self, name: &str, keep: &[ExtensionPoint]) -> bool {
        let mut removed = false;
        for (point, bucket) in self.buckets.iter_mut() {
            if keep.contains(point) {
                continue;
            }
            let before = bucket.len();
            bucket.retain(|e| e.descriptor.name != name);
            removed |= bucket.len() != before;
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        removed
    }
}

/// Registry of extensions keyed by area and component type.
///
/// Shared between the orchestrator (writer) and the resolver (reader).
/// Every read returns a snapshot; callers never observe a bucket mid-update.
#[derive(Default)]
pub struct PluginRegistry {
    inner: RwLock<RegistryInner>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("PluginRegistry")
            .field("buckets", &inner.buckets.len())
            .field("plugins", &inner.status.len())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge entries into their buckets.
    ///
    /// An entry whose name is already present in the bucket replaces the old
    /// one in place.
    pub fn add(&self, entries: impl IntoIterator<Item = RegistryEntry>) {
        let mut inner = self.inner.write();
        for entry in entries {
            inner.upsert(entry);
        }
    }

    /// Replace everything registered under `name` with `entries` in one step.
    ///
    /// Buckets the plugin no longer contributes to lose its entry; buckets it
    /// still contributes to keep the entry's position.
    pub fn register_plugin(&self, name: &str, entries: Vec<RegistryEntry>) {
        let keep: Vec<ExtensionPoint> = entries.iter().map(RegistryEntry::extension_point).collect();

        let mut inner = self.inner.write();
        if inner.purge(name, &keep) {
            tracing::debug!(plugin = %name, "Dropped stale extension points");
        }
        for entry in entries {
            inner.upsert(entry);
        }
    }

    /// Replace an existing entry. Returns `false` if there was nothing to
    /// replace.
    pub fn update(&self, entry: RegistryEntry) -> bool {
        let mut inner = self.inner.write();
        let Some(bucket) = inner.buckets.get_mut(&entry.extension_point()) else {
            return false;
        };

        match bucket.iter_mut().find(|e| e.descriptor.name == entry.descriptor.name) {
            Some(existing) => {
                *existing = entry;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the entries for an extension point, in insertion order.
    pub fn get(&self, area: Area, component_type: ComponentType) -> Vec<RegistryEntry> {
        self.inner
            .read()
            .buckets
            .get(&ExtensionPoint::new(area, component_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Remove a plugin from every bucket. Returns `true` if anything was
    /// removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.purge(name, &[]);
        if let Some(state) = inner.status.get_mut(name) {
            *state = EntryState::Removed;
        }
        removed
    }

    /// Lifecycle state of a plugin name, if it was ever registered.
    pub fn status(&self, name: &str) -> Option<EntryState> {
        self.inner.read().status.get(name).copied()
    }

    /// Names of the currently registered plugins, sorted.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut names: Vec<String> = inner
            .status
            .iter()
            .filter(|(_, state)| **state == EntryState::Registered)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Total number of entries across all buckets.
    pub fn len(&self) -> usize {
        self.inner.read().buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extension points with at least one entry.
    pub fn extension_points(&self) -> Vec<ExtensionPoint> {
        self.inner.read().buckets.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{BundleInstantiator, ModuleBundle, ModuleInstantiator};

    fn descriptor(name: &str, area: Area, ty: ComponentType, module: &str) -> PluginDescriptor {
        PluginDescriptor {
            name: name.to_string(),
            version: "1.0".to_string(),
            area,
            component_type: ty,
            module_path: module.to_string(),
            source_path: name.to_string(),
            slice: None,
            digest: None,
        }
    }

    fn entry(name: &str, area: Area, ty: ComponentType, module: &str) -> RegistryEntry {
        let descriptor = descriptor(name, area, ty, module);
        let module = BundleInstantiator
            .instantiate(ModuleBundle {
                descriptor: descriptor.clone(),
                source: format!("{name}/{module}"),
                bytes: module.as_bytes().to_vec(),
            })
            .unwrap();
        RegistryEntry::new(descriptor, module)
    }

    fn sources(entries: &[RegistryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.module.source()).collect()
    }

    #[test]
    fn test_add_and_get_in_order() {
        let registry = PluginRegistry::new();
        registry.add([
            entry("b", Area::Toolbar, ComponentType::None, "B.js"),
            entry("a", Area::Toolbar, ComponentType::None, "A.js"),
        ]);

        let entries = registry.get(Area::Toolbar, ComponentType::None);
        assert_eq!(sources(&entries), vec!["b/B.js", "a/A.js"]);
        assert!(registry.get(Area::Dashboard, ComponentType::Widget).is_empty());
    }

    #[test]
    fn test_readd_replaces_in_place() {
        let registry = PluginRegistry::new();
        registry.add([
            entry("a", Area::Toolbar, ComponentType::None, "A1.js"),
            entry("b", Area::Toolbar, ComponentType::None, "B.js"),
        ]);
        registry.add([entry("a", Area::Toolbar, ComponentType::None, "A2.js")]);

        let entries = registry.get(Area::Toolbar, ComponentType::None);
        assert_eq!(sources(&entries), vec!["a/A2.js", "b/B.js"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_same_name_in_different_buckets() {
        let registry = PluginRegistry::new();
        registry.add([
            entry("a", Area::Toolbar, ComponentType::None, "Tool.js"),
            entry("a", Area::StockLine, ComponentType::EditViewField, "Field.js"),
        ]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.extension_points().len(), 2);
        assert_eq!(registry.names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_update_existing_and_missing() {
        let registry = PluginRegistry::new();
        registry.add([entry("a", Area::Toolbar, ComponentType::None, "A1.js")]);

        assert!(registry.update(entry("a", Area::Toolbar, ComponentType::None, "A2.js")));
        assert!(!registry.update(entry("b", Area::Toolbar, ComponentType::None, "B.js")));
        assert!(!registry.update(entry("a", Area::Dashboard, ComponentType::Widget, "W.js")));

        let entries = registry.get(Area::Toolbar, ComponentType::None);
        assert_eq!(sources(&entries), vec!["a/A2.js"]);
        assert_eq!(registry.status("b"), None);
    }

    #[test]
    fn test_remove_and_status() {
        let registry = PluginRegistry::new();
        registry.add([
            entry("a", Area::Toolbar, ComponentType::None, "A.js"),
            entry("a", Area::Dashboard, ComponentType::Widget, "W.js"),
            entry("b", Area::Toolbar, ComponentType::None, "B.js"),
        ]);

        assert!(registry.remove("a"));
        assert_eq!(registry.status("a"), Some(EntryState::Removed));
        assert_eq!(registry.names(), vec!["b".to_string()]);
        assert!(registry.get(Area::Dashboard, ComponentType::Widget).is_empty());
        assert!(!registry.remove("a"));

        registry.add([entry("a", Area::Toolbar, ComponentType::None, "A.js")]);
        assert_eq!(registry.status("a"), Some(EntryState::Registered));
    }

    #[test]
    fn test_register_plugin_drops_stale_points() {
        let registry = PluginRegistry::new();
        registry.add([
            entry("a", Area::Toolbar, ComponentType::None, "A.js"),
            entry("a", Area::Dashboard, ComponentType::Widget, "W.js"),
        ]);

        registry.register_plugin("a", vec![entry("a", Area::Toolbar, ComponentType::None, "A2.js")]);

        assert_eq!(registry.extension_points(), vec![ExtensionPoint::new(Area::Toolbar, ComponentType::None)]);
        assert_eq!(sources(&registry.get(Area::Toolbar, ComponentType::None)), vec!["a/A2.js"]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = PluginRegistry::new();
        registry.add([entry("a", Area::Toolbar, ComponentType::None, "A.js")]);

        let snapshot = registry.get(Area::Toolbar, ComponentType::None);
        registry.remove("a");

        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }
}
