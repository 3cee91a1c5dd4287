//! Read-side lookup of composed extensions.

use std::sync::Arc;

use super::{Area, ComponentType, ExtensionModule, PluginRegistry, RegistryEntry};

/// Hands the host the modules registered for an extension point.
///
/// Reads straight through to the registry on every call.
#[derive(Debug, Clone)]
pub struct ExtensionResolver {
    registry: Arc<PluginRegistry>,
}

impl ExtensionResolver {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Modules for `(area, component_type)`, in registration order.
    pub fn get(&self, area: Area, component_type: ComponentType) -> Vec<Arc<dyn ExtensionModule>> {
        self.registry.get(area, component_type).into_iter().map(|entry| entry.module).collect()
    }

    /// Full registry entries for `(area, component_type)`.
    pub fn entries(&self, area: Area, component_type: ComponentType) -> Vec<RegistryEntry> {
        self.registry.get(area, component_type)
    }
}
