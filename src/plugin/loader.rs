//! Plugin module loaders.
//!
//! Host code depends only on the [`Loader`] trait. Two implementations sit
//! behind it: [`RemoteLoader`] fetches bundles from the plugin host over
//! HTTP, and [`LocalDevLoader`] reads modules from a local checkout.
//! [`CoalescingLoader`] wraps either one to collapse concurrent loads of the
//! same module and to bound every load with a timeout.

use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use super::{
    ExtensionModule, LoadMode, LocalWorkspace, ModuleBundle, ModuleInstantiator, PluginDescriptor,
    PluginError, PluginResult,
};

/// Loads the module behind a descriptor.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Fetch and instantiate the module for `descriptor`.
    async fn load(&self, descriptor: &PluginDescriptor) -> PluginResult<Arc<dyn ExtensionModule>>;

    /// Which mode this loader serves.
    fn mode(&self) -> LoadMode;
}

#[cfg(feature = "remote")]
pub use remote::RemoteLoader;

#[cfg(feature = "remote")]
mod remote {
    use std::sync::Arc;

    use async_trait::async_trait;
    use reqwest::Url;

    use super::Loader;
    use crate::plugin::{
        ExtensionModule, LoadMode, ModuleBundle, ModuleInstantiator, PluginDescriptor,
        PluginError, PluginResult,
    };

    /// Fetches plugin bundles from the plugin host.
    ///
    /// Module URLs are `{base}/{source_path}/{module_path}`.
    pub struct RemoteLoader {
        base: Url,
        client: reqwest::Client,
        instantiator: Arc<dyn ModuleInstantiator>,
    }

    impl RemoteLoader {
        pub fn new(base_url: &str, instantiator: Arc<dyn ModuleInstantiator>) -> PluginResult<Self> {
            let mut base = Url::parse(base_url)
                .map_err(|e| PluginError::Config(format!("invalid plugin host url '{base_url}': {e}")))?;

            if !base.path().ends_with('/') {
                let path = format!("{}/", base.path());
                base.set_path(&path);
            }

            let client = reqwest::Client::builder()
                .user_agent(format!("plugin-composer/{}", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| PluginError::Network(e.to_string()))?;

            Ok(Self { base, client, instantiator })
        }

        pub fn base(&self) -> &Url {
            &self.base
        }

        /// Resolve the module URL for `descriptor`.
        ///
        /// Paths that would climb out of the plugin host base are rejected.
        pub fn resolve(&self, descriptor: &PluginDescriptor) -> PluginResult<Url> {
            let source = descriptor.source_path.trim_matches('/');
            let module = descriptor.normalized_module_path();
            let relative =
                if source.is_empty() { module.to_string() } else { format!("{source}/{module}") };

            let url = self
                .base
                .join(&relative)
                .map_err(|e| PluginError::LoadError(format!("invalid module path '{relative}': {e}")))?;

            if !url.as_str().starts_with(self.base.as_str()) {
                return Err(PluginError::LoadError(format!(
                    "module path '{relative}' escapes the plugin host"
                )));
            }

            Ok(url)
        }
    }

    #[async_trait]
    impl Loader for RemoteLoader {
        async fn load(&self, descriptor: &PluginDescriptor) -> PluginResult<Arc<dyn ExtensionModule>> {
            let url = self.resolve(descriptor)?;
            tracing::debug!(plugin = %descriptor.name, url = %url, "Fetching plugin bundle");

            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| PluginError::Network(e.to_string()))?;

            if !response.status().is_success() {
                return Err(PluginError::Network(format!(
                    "Failed to fetch {url}: HTTP {}",
                    response.status()
                )));
            }

            let bytes = response.bytes().await.map_err(|e| PluginError::Network(e.to_string()))?;

            self.instantiator.instantiate(ModuleBundle {
                descriptor: descriptor.clone(),
                source: url.to_string(),
                bytes: bytes.to_vec(),
            })
        }

        fn mode(&self) -> LoadMode {
            LoadMode::Remote
        }
    }

}

/// Loads modules from a local plugin checkout.
pub struct LocalDevLoader {
    workspace: Arc<LocalWorkspace>,
    instantiator: Arc<dyn ModuleInstantiator>,
}

impl LocalDevLoader {
    pub fn new(workspace: Arc<LocalWorkspace>, instantiator: Arc<dyn ModuleInstantiator>) -> Self {
        Self { workspace, instantiator }
    }

    pub fn workspace(&self) -> &Arc<LocalWorkspace> {
        &self.workspace
    }
}

#[async_trait]
impl Loader for LocalDevLoader {
    async fn load(&self, descriptor: &PluginDescriptor) -> PluginResult<Arc<dyn ExtensionModule>> {
        let dir = self
            .workspace
            .resolve(&descriptor.source_path)
            .or_else(|| self.workspace.resolve(&descriptor.name))
            .ok_or_else(|| PluginError::NotDiscovered(descriptor.name.clone()))?;

        let relative = Path::new(descriptor.normalized_module_path());
        if relative.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(PluginError::LoadError(format!(
                "module path '{}' escapes the plugin directory",
                descriptor.module_path
            )));
        }

        let path = dir.join(relative);
        if !path.is_file() {
            return Err(PluginError::NotFound(path));
        }

        let bytes = tokio::fs::read(&path).await?;

        self.instantiator.instantiate(ModuleBundle {
            descriptor: descriptor.clone(),
            source: path.display().to_string(),
            bytes,
        })
    }

    fn mode(&self) -> LoadMode {
        LoadMode::Local
    }
}

type LoadKey = (String, String, String);
type SharedLoad = Shared<BoxFuture<'static, Result<Arc<dyn ExtensionModule>, Arc<PluginError>>>>;

/// Collapses concurrent loads of the same module onto one future.
///
/// Loads are keyed by plugin name, version and module path. Once a load
/// settles, the next request starts a fresh one.
pub struct CoalescingLoader {
    inner: Arc<dyn Loader>,
    timeout: Option<Duration>,
    /// Each in-flight load carries the id it was started with, so a settled
    /// load only clears its own entry.
    in_flight: Arc<Mutex<HashMap<LoadKey, (u64, SharedLoad)>>>,
    next_id: AtomicU64,
}

impl CoalescingLoader {
    pub fn new(inner: Arc<dyn Loader>) -> Self {
        Self {
            inner,
            timeout: None,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Fail any load that takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of loads currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Build the shared load future. Nothing runs until it is first polled.
    fn start(&self, key: LoadKey, id: u64, descriptor: &PluginDescriptor) -> SharedLoad {
        let inner = Arc::clone(&self.inner);
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.timeout;
        let descriptor = descriptor.clone();

        async move {
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, inner.load(&descriptor))
                    .await
                    .unwrap_or_else(|_| Err(PluginError::Timeout(descriptor.name.clone(), limit))),
                None => inner.load(&descriptor).await,
            };

            let mut map = in_flight.lock();
            if matches!(map.get(&key), Some((current, _)) if *current == id) {
                map.remove(&key);
            }
            drop(map);

            result.map_err(Arc::new)
        }
        .boxed()
        .shared()
    }
}

#[async_trait]
impl Loader for CoalescingLoader {
    async fn load(&self, descriptor: &PluginDescriptor) -> PluginResult<Arc<dyn ExtensionModule>> {
        let key = (
            descriptor.name.clone(),
            descriptor.version.clone(),
            descriptor.normalized_module_path().to_string(),
        );

        let load = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some((_, load)) => {
                    tracing::debug!(plugin = %descriptor.name, "Joining in-flight load");
                    load.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let load = self.start(key.clone(), id, descriptor);
                    in_flight.insert(key, (id, load.clone()));
                    load
                }
            }
        };

        load.await.map_err(|e| Arc::try_unwrap(e).unwrap_or_else(PluginError::Coalesced))
    }

    fn mode(&self) -> LoadMode {
        self.inner.mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::discovery::plugin_dir;
    use crate::plugin::{Area, BundleInstantiator, BundleModule, ComponentType, MANIFEST_FILE};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn descriptor(name: &str, module: &str) -> PluginDescriptor {
        PluginDescriptor {
            name: name.to_string(),
            version: "1.0".to_string(),
            area: Area::Toolbar,
            component_type: ComponentType::None,
            module_path: module.to_string(),
            source_path: name.to_string(),
            slice: None,
            digest: None,
        }
    }

    /// Loader that counts calls and resolves after a delay.
    struct SlowLoader {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Loader for SlowLoader {
        async fn load(&self, descriptor: &PluginDescriptor) -> PluginResult<Arc<dyn ExtensionModule>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(PluginError::Network("connection refused".to_string()));
            }
            BundleInstantiator.instantiate(ModuleBundle {
                descriptor: descriptor.clone(),
                source: "memory".to_string(),
                bytes: Vec::new(),
            })
        }

        fn mode(&self) -> LoadMode {
            LoadMode::Remote
        }
    }

    fn slow(delay_ms: u64, fail: bool) -> Arc<SlowLoader> {
        Arc::new(SlowLoader { calls: AtomicUsize::new(0), delay: Duration::from_millis(delay_ms), fail })
    }

    fn local_workspace(temp: &TempDir) -> Arc<LocalWorkspace> {
        let dir = plugin_dir(temp.path(), "stock-donor");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), "{}").unwrap();
        std::fs::write(dir.join("Widget.js"), "export default 'donor'").unwrap();

        let workspace = Arc::new(LocalWorkspace::new(temp.path()));
        workspace.rescan();
        workspace
    }

    #[tokio::test]
    async fn test_local_loader_reads_module() {
        let temp = TempDir::new().unwrap();
        let loader = LocalDevLoader::new(local_workspace(&temp), Arc::new(BundleInstantiator));

        let module = loader.load(&descriptor("stock-donor", "./Widget.js")).await.unwrap();
        let bundle = module.as_any().downcast_ref::<BundleModule>().unwrap();

        assert_eq!(bundle.as_text(), Some("export default 'donor'"));
        assert_eq!(loader.mode(), LoadMode::Local);
    }

    #[tokio::test]
    async fn test_local_loader_missing_module() {
        let temp = TempDir::new().unwrap();
        let loader = LocalDevLoader::new(local_workspace(&temp), Arc::new(BundleInstantiator));

        let result = loader.load(&descriptor("stock-donor", "./Missing.js")).await;
        assert!(matches!(result, Err(PluginError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_loader_undiscovered_plugin() {
        let temp = TempDir::new().unwrap();
        let loader = LocalDevLoader::new(local_workspace(&temp), Arc::new(BundleInstantiator));

        let result = loader.load(&descriptor("unknown", "./Widget.js")).await;
        assert!(matches!(result, Err(PluginError::NotDiscovered(name)) if name == "unknown"));
    }

    #[tokio::test]
    async fn test_local_loader_rejects_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let loader = LocalDevLoader::new(local_workspace(&temp), Arc::new(BundleInstantiator));

        let result = loader.load(&descriptor("stock-donor", "../../secrets.txt")).await;
        assert!(matches!(result, Err(PluginError::LoadError(_))));
    }

    #[tokio::test]
    async fn test_concurrent_loads_coalesce() {
        let inner = slow(50, false);
        let loader = CoalescingLoader::new(inner.clone());
        let d = descriptor("stock-donor", "./Widget.js");

        let (a, b, c) = tokio::join!(loader.load(&d), loader.load(&d), loader.load(&d));

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(loader.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_loads_do_not_coalesce() {
        let inner = slow(1, false);
        let loader = CoalescingLoader::new(inner.clone());
        let d = descriptor("stock-donor", "./Widget.js");

        tokio_test::assert_ok!(loader.load(&d).await);
        tokio_test::assert_ok!(loader.load(&d).await);

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_modules_load_separately() {
        let inner = slow(20, false);
        let loader = CoalescingLoader::new(inner.clone());

        let widget = descriptor("stock-donor", "./Widget.js");
        let column = descriptor("stock-donor", "./Column.js");
        let (a, b) = tokio::join!(loader.load(&widget), loader.load(&column));

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_coalesced_failure_reaches_every_caller() {
        let inner = slow(20, true);
        let loader = CoalescingLoader::new(inner.clone());
        let d = descriptor("stock-donor", "./Widget.js");

        let (a, b) = tokio::join!(loader.load(&d), loader.load(&d));

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        for result in [a, b] {
            let err = result.unwrap_err();
            assert!(matches!(err.root(), PluginError::Network(_)));
        }
    }

    #[tokio::test]
    async fn test_load_timeout() {
        let loader = CoalescingLoader::new(slow(5_000, false)).with_timeout(Duration::from_millis(20));

        let result = loader.load(&descriptor("slow-plugin", "./Widget.js")).await;

        tokio_test::assert_err!(&result);
        let err = result.unwrap_err();
        assert!(matches!(&err, PluginError::Timeout(name, limit)
            if name == "slow-plugin" && *limit == Duration::from_millis(20)));
        assert_eq!(err.to_string(), "Plugin 'slow-plugin' timed out after 20ms");
        assert_eq!(loader.in_flight(), 0);
    }

    #[test]
    fn test_racing_loads_on_worker_threads_start_once() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            for _ in 0..50 {
                let inner = slow(10, false);
                let loader = Arc::new(CoalescingLoader::new(inner.clone()));
                let barrier = Arc::new(tokio::sync::Barrier::new(8));

                let handles: Vec<_> = (0..8)
                    .map(|_| {
                        let loader = Arc::clone(&loader);
                        let barrier = Arc::clone(&barrier);
                        tokio::spawn(async move {
                            barrier.wait().await;
                            loader.load(&descriptor("stock-donor", "./Widget.js")).await
                        })
                    })
                    .collect();

                for handle in handles {
                    assert!(handle.await.unwrap().is_ok());
                }
                assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
                assert_eq!(loader.in_flight(), 0);
            }
        });
    }

    #[tokio::test]
    async fn test_settled_load_keeps_newer_entry() {
        let inner = slow(30, false);
        let loader = CoalescingLoader::new(inner.clone());
        let d = descriptor("stock-donor", "./Widget.js");
        let key = ("stock-donor".to_string(), "1.0".to_string(), "Widget.js".to_string());

        let stale = loader.start(key.clone(), 100, &d);
        let current = loader.start(key.clone(), 101, &d);
        loader.in_flight.lock().insert(key.clone(), (101, current.clone()));

        tokio_test::assert_ok!(stale.await);
        assert_eq!(loader.in_flight(), 1);

        tokio_test::assert_ok!(current.await);
        assert_eq!(loader.in_flight(), 0);
    }
}
