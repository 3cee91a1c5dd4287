//! Plugin catalog sources.
//!
//! A catalog lists the plugins available to the host: for each one, the raw
//! manifest and the path its modules are served from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::PluginResult;

/// One plugin as listed by a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Manifest JSON, unparsed.
    pub config: String,
    /// Path the plugin's modules are resolved against.
    pub path: String,
}

impl CatalogEntry {
    pub fn new(config: impl Into<String>, path: impl Into<String>) -> Self {
        Self { config: config.into(), path: path.into() }
    }
}

/// Source of the plugin catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// List every available plugin.
    async fn list(&self) -> PluginResult<Vec<CatalogEntry>>;

    /// Human readable description for logs.
    fn describe(&self) -> String;
}

/// A fixed, in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: Vec<CatalogEntry>,
}

impl StaticCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: CatalogEntry) {
        self.entries.push(entry);
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn list(&self) -> PluginResult<Vec<CatalogEntry>> {
        Ok(self.entries.clone())
    }

    fn describe(&self) -> String {
        format!("static catalog ({} entries)", self.entries.len())
    }
}

#[cfg(feature = "remote")]
pub use http::HttpCatalog;

#[cfg(feature = "remote")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{CatalogEntry, CatalogSource};
    use crate::plugin::{PluginError, PluginResult};

    /// Catalog served as a JSON array of [`CatalogEntry`] over HTTP.
    pub struct HttpCatalog {
        url: String,
        client: reqwest::Client,
    }

    impl HttpCatalog {
        pub fn new(url: impl Into<String>) -> PluginResult<Self> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(format!("plugin-composer/{}", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| PluginError::Network(e.to_string()))?;

            Ok(Self { url: url.into(), client })
        }

        pub fn url(&self) -> &str {
            &self.url
        }
    }

    #[async_trait]
    impl CatalogSource for HttpCatalog {
        async fn list(&self) -> PluginResult<Vec<CatalogEntry>> {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| PluginError::Network(e.to_string()))?;

            if !response.status().is_success() {
                return Err(PluginError::Network(format!(
                    "Failed to fetch plugin catalog: HTTP {}",
                    response.status()
                )));
            }

            response
                .json::<Vec<CatalogEntry>>()
                .await
                .map_err(|e| PluginError::Network(format!("Invalid catalog format: {e}")))
        }

        fn describe(&self) -> String {
            format!("remote catalog at {}", self.url)
        }
    }
}
