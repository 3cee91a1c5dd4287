//! Configuration management for the plugin composer.
//!
//! Handles loading and saving configuration from TOML files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::plugin::{LoadMode, HOST_VERSION, MODE_ENV_VAR};

/// Local config file, looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = ".plugin-composer.toml";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plugin composition settings
    pub plugins: PluginsConfig,
}

/// Plugin composition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Where plugin modules come from
    pub mode: LoadMode,

    /// Base URL plugin bundles are served from (remote mode)
    pub host_url: String,

    /// URL of the JSON plugin catalog (remote mode).
    /// Defaults to `{host_url}/plugins.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_url: Option<String>,

    /// Checkout containing `plugins/{name}/frontend/latest` (local mode)
    pub local_root: PathBuf,

    /// Seconds before a single module load is abandoned
    pub load_timeout_secs: u64,

    /// Host version plugins are checked against.
    /// Defaults to the composer's own version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_version: Option<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            mode: LoadMode::default(),
            host_url: "http://localhost:8000/plugins".to_string(),
            catalog_url: None,
            local_root: PathBuf::from("."),
            load_timeout_secs: 30,
            host_version: None,
        }
    }
}

impl PluginsConfig {
    /// The catalog URL, falling back to `plugins.json` under the host URL.
    pub fn catalog_url(&self) -> String {
        match &self.catalog_url {
            Some(url) => url.clone(),
            None => format!("{}/plugins.json", self.host_url.trim_end_matches('/')),
        }
    }

    /// The effective host version string.
    pub fn host_version(&self) -> &str {
        self.host_version.as_deref().unwrap_or(HOST_VERSION)
    }
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// Checks (in order):
    /// 1. `./.plugin-composer.toml` (project-local)
    /// 2. `~/.config/plugin-composer/config.toml` (global)
    /// 3. Default values
    ///
    /// The mode environment variable is applied on top.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_file_or_default()?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn load_file_or_default() -> anyhow::Result<Self> {
        // Try local config first
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        // Try global config
        if let Some(global_config) = Self::global_config_path() {
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply `PLUGIN_COMPOSER_MODE` if set.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(value) = std::env::var(MODE_ENV_VAR) {
            self.plugins.mode = value
                .parse()
                .map_err(|e| anyhow::anyhow!("{MODE_ENV_VAR}: {e}"))?;
        }
        Ok(())
    }

    /// Save configuration to the global config file and return its path.
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = Self::global_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "Saved configuration");

        Ok(())
    }

    /// Which file `load()` would read, if any.
    pub fn active_path() -> Option<PathBuf> {
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }
        Self::global_config_path().filter(|p| p.exists())
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("plugin-composer"))
    }

    fn global_config_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.plugins.mode, LoadMode::Remote);
        assert_eq!(config.plugins.load_timeout_secs, 30);
        assert_eq!(config.plugins.catalog_url(), "http://localhost:8000/plugins/plugins.json");
        assert_eq!(config.plugins.host_version(), HOST_VERSION);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        assert!(toml.contains("[plugins]"));
        assert!(toml.contains("mode = \"remote\""));

        let back: Config = toml::from_str(&toml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [plugins]
            mode = "local"
            local_root = "/srv/open-msupply"
            catalog_url = "https://catalog.example/plugins.json"
            host_version = "2.3.0"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.plugins.mode, LoadMode::Local);
        assert_eq!(config.plugins.local_root, PathBuf::from("/srv/open-msupply"));
        assert_eq!(config.plugins.catalog_url(), "https://catalog.example/plugins.json");
        assert_eq!(config.plugins.host_version(), "2.3.0");
        // Unset fields keep their defaults
        assert_eq!(config.plugins.load_timeout_secs, 30);
    }

    #[test]
    fn test_save_to_round_trips() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.plugins.mode = LoadMode::Local;
        config.plugins.load_timeout_secs = 7;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "[plugins]\nload_timeout_secs = 5\n").unwrap();

        let config = Config::load_from_file(temp.path()).unwrap();
        assert_eq!(config.plugins.load_timeout_secs, 5);

        std::fs::write(temp.path(), "[plugins\n").unwrap();
        assert!(Config::load_from_file(temp.path()).is_err());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var(MODE_ENV_VAR, "local");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.plugins.mode, LoadMode::Local);

        std::env::set_var(MODE_ENV_VAR, "sideways");
        assert!(config.apply_env_overrides().is_err());

        std::env::remove_var(MODE_ENV_VAR);
    }

    #[test]
    #[serial]
    fn test_no_env_override() {
        std::env::remove_var(MODE_ENV_VAR);
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.plugins.mode, LoadMode::Remote);
    }
}
