//! Loaded extension modules.
//!
//! A loader fetches the raw bytes of a plugin module and hands them to a
//! [`ModuleInstantiator`], which turns them into an [`ExtensionModule`]: the
//! late-bound object the registry stores and the resolver hands to the host.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::types::normalize_module_path;
use super::{PluginDescriptor, PluginError, PluginResult};
use crate::store::SharedReducer;

/// A module contributed by a plugin, as seen by the host.
///
/// Host code receives these behind an `Arc` and may downcast through
/// [`ExtensionModule::as_any`] to the concrete type its render layer knows.
pub trait ExtensionModule: Send + Sync + std::fmt::Debug {
    /// Name of the plugin that contributed this module.
    fn plugin(&self) -> &str;

    /// Where the module was loaded from (URL or file path).
    fn source(&self) -> &str;

    /// The reducer for the plugin's state slice, if the module exports one.
    fn reducer(&self) -> Option<SharedReducer> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Raw module bytes as fetched by a loader.
#[derive(Debug, Clone)]
pub struct ModuleBundle {
    /// The descriptor the bundle was fetched for.
    pub descriptor: PluginDescriptor,
    /// Resolved location (URL or file path).
    pub source: String,
    /// Module contents.
    pub bytes: Vec<u8>,
}

impl ModuleBundle {
    /// Hex SHA-256 of the bundle contents.
    pub fn digest(&self) -> String {
        hex_digest(&self.bytes)
    }
}

/// Turns fetched bytes into an extension module.
pub trait ModuleInstantiator: Send + Sync {
    fn instantiate(&self, bundle: ModuleBundle) -> PluginResult<Arc<dyn ExtensionModule>>;
}

/// A module kept as an opaque, verified bundle.
///
/// This is what a host gets when it renders plugin code itself (for
/// example by handing the bytes to a web view).
#[derive(Debug, Clone)]
pub struct BundleModule {
    plugin: String,
    module_path: String,
    source: String,
    digest: String,
    bytes: Arc<[u8]>,
}

impl BundleModule {
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    /// Hex SHA-256 of the bundle.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bundle contents as UTF-8, if they are text.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

impl ExtensionModule for BundleModule {
    fn plugin(&self) -> &str {
        &self.plugin
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Default instantiator: verifies the digest declared in the manifest (if
/// any) and wraps the bytes in a [`BundleModule`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleInstantiator;

impl ModuleInstantiator for BundleInstantiator {
    fn instantiate(&self, bundle: ModuleBundle) -> PluginResult<Arc<dyn ExtensionModule>> {
        let digest = bundle.digest();

        if let Some(expected) = &bundle.descriptor.digest {
            if *expected != digest {
                return Err(PluginError::Validation(format!(
                    "Digest mismatch for {}: expected {}, got {}",
                    bundle.source, expected, digest
                )));
            }
        }

        Ok(Arc::new(BundleModule {
            plugin: bundle.descriptor.name.clone(),
            module_path: bundle.descriptor.module_path.clone(),
            source: bundle.source,
            digest,
            bytes: bundle.bytes.into(),
        }))
    }
}

/// Builds a native module from a fetched bundle.
pub type ModuleFactory =
    Arc<dyn Fn(ModuleBundle) -> PluginResult<Arc<dyn ExtensionModule>> + Send + Sync>;

/// Instantiator backed by host-provided native factories.
///
/// Factories are keyed by plugin name and module path. Modules with no
/// registered factory fall through to [`BundleInstantiator`].
#[derive(Default, Clone)]
pub struct FactoryInstantiator {
    factories: HashMap<(String, String), ModuleFactory>,
    fallback: BundleInstantiator,
}

impl std::fmt::Debug for FactoryInstantiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryInstantiator").field("factories", &self.factories.keys()).finish()
    }
}

impl FactoryInstantiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `module_path` of `plugin`.
    pub fn register<F>(&mut self, plugin: &str, module_path: &str, factory: F)
    where
        F: Fn(ModuleBundle) -> PluginResult<Arc<dyn ExtensionModule>> + Send + Sync + 'static,
    {
        self.factories.insert(
            (plugin.to_string(), normalize_module_path(module_path).to_string()),
            Arc::new(factory),
        );
    }

    pub fn with<F>(mut self, plugin: &str, module_path: &str, factory: F) -> Self
    where
        F: Fn(ModuleBundle) -> PluginResult<Arc<dyn ExtensionModule>> + Send + Sync + 'static,
    {
        self.register(plugin, module_path, factory);
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl ModuleInstantiator for FactoryInstantiator {
    fn instantiate(&self, bundle: ModuleBundle) -> PluginResult<Arc<dyn ExtensionModule>> {
        let key = (
            bundle.descriptor.name.clone(),
            bundle.descriptor.normalized_module_path().to_string(),
        );

        match self.factories.get(&key) {
            Some(factory) => factory(bundle),
            None => self.fallback.instantiate(bundle),
        }
    }
}

/// Hex SHA-256 of `bytes`.
pub fn hex_digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Area, ComponentType};
    use crate::store::Action;
    use serde_json::{json, Value};

    fn descriptor(digest: Option<&str>) -> PluginDescriptor {
        PluginDescriptor {
            name: "stock-donor".to_string(),
            version: "1.0".to_string(),
            area: Area::Toolbar,
            component_type: ComponentType::None,
            module_path: "./Widget.js".to_string(),
            source_path: "stock-donor".to_string(),
            slice: None,
            digest: digest.map(str::to_string),
        }
    }

    fn bundle(digest: Option<&str>) -> ModuleBundle {
        ModuleBundle {
            descriptor: descriptor(digest),
            source: "plugins/stock-donor/Widget.js".to_string(),
            bytes: b"export default 1".to_vec(),
        }
    }

    #[derive(Debug)]
    struct DonorModule;

    impl ExtensionModule for DonorModule {
        fn plugin(&self) -> &str {
            "stock-donor"
        }

        fn source(&self) -> &str {
            "native"
        }

        fn reducer(&self) -> Option<SharedReducer> {
            Some(Arc::new(|_: Option<&Value>, _: &Action| json!("donor")))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_hex_digest() {
        assert_eq!(
            hex_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_bundle_instantiator_wraps_bytes() {
        let module = BundleInstantiator.instantiate(bundle(None)).unwrap();

        assert_eq!(module.plugin(), "stock-donor");
        assert_eq!(module.source(), "plugins/stock-donor/Widget.js");
        assert!(module.reducer().is_none());

        let bundle_module = module.as_any().downcast_ref::<BundleModule>().unwrap();
        assert_eq!(bundle_module.as_text(), Some("export default 1"));
        assert_eq!(bundle_module.digest(), hex_digest(b"export default 1"));
    }

    #[test]
    fn test_digest_verification() {
        let good = hex_digest(b"export default 1");
        assert!(BundleInstantiator.instantiate(bundle(Some(&good))).is_ok());

        let result = BundleInstantiator.instantiate(bundle(Some("deadbeef")));
        assert!(matches!(result, Err(PluginError::Validation(_))));
    }

    #[test]
    fn test_factory_instantiator_prefers_factory() {
        let instantiator = FactoryInstantiator::new()
            .with("stock-donor", "Widget.js", |_| Ok(Arc::new(DonorModule) as Arc<dyn ExtensionModule>));

        let module = instantiator.instantiate(bundle(None)).unwrap();
        assert!(module.as_any().is::<DonorModule>());
        assert!(module.reducer().is_some());
    }

    #[test]
    fn test_factory_instantiator_falls_back() {
        let instantiator = FactoryInstantiator::new()
            .with("other-plugin", "./Widget.js", |_| Ok(Arc::new(DonorModule) as Arc<dyn ExtensionModule>));

        let module = instantiator.instantiate(bundle(None)).unwrap();
        assert!(module.as_any().is::<BundleModule>());
        assert_eq!(instantiator.len(), 1);
    }
}
