//! Plugin manifest parsing and validation.
//!
//! A plugin manifest is an untrusted JSON document describing a plugin's
//! name, version and the components it contributes. Parsing turns it into
//! zero or more [`PluginDescriptor`]s, one per accepted component.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Area, ComponentType, ParseError, PluginDescriptor, UnknownExtensionKind};

/// Top-level fields every manifest must carry.
const REQUIRED_FIELDS: [&str; 3] = ["name", "version", "components"];

/// Plugin manifest as published by a plugin.
///
/// Unknown top-level fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin name (unique identifier).
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Raw component entries. Each is decoded on its own so one bad entry
    /// does not sink the rest.
    pub components: Vec<Value>,
    /// Host requirements.
    #[serde(default)]
    pub dependencies: ManifestDependencies,
    /// State slice id owned by the plugin.
    #[serde(default)]
    pub slice: Option<String>,
}

/// Host requirements declared by a plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestDependencies {
    /// Semver requirement on the host version.
    #[serde(rename = "omSupplyVersion", default)]
    pub host_version: Option<String>,
}

/// A single component entry in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginComponentSpec {
    pub area: String,
    #[serde(rename = "type")]
    pub component_type: String,
    pub module: String,
    /// Expected hex SHA-256 of the module bundle.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Why a single component was dropped.
#[derive(Debug, thiserror::Error)]
enum ComponentRejection {
    #[error("{0}")]
    UnknownKind(#[from] UnknownExtensionKind),
    #[error("malformed component: {0}")]
    Malformed(String),
}

/// Parse a manifest into descriptors.
///
/// Components with an unrecognised area or type are skipped with a warning.
/// If every component is skipped the result is an empty list.
pub fn parse(manifest_json: &str, source_path: &str) -> Result<Vec<PluginDescriptor>, ParseError> {
    let manifest = PluginManifest::from_json(manifest_json)?;
    manifest.validate()?;
    Ok(manifest.descriptors(source_path))
}

impl PluginManifest {
    /// Parse a manifest from a JSON string without validating it.
    pub fn from_json(content: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| ParseError::MalformedManifest(e.to_string()))?;

        let object = value.as_object().ok_or_else(|| {
            ParseError::MalformedManifest("manifest must be a JSON object".to_string())
        })?;

        if let Some(missing) = REQUIRED_FIELDS.into_iter().find(|f| !object.contains_key(*f)) {
            return Err(ParseError::MissingField(missing));
        }

        serde_json::from_value(value).map_err(|e| ParseError::MalformedManifest(e.to_string()))
    }

    /// Validate manifest-level fields.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.name.is_empty() {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "plugin name is required".to_string(),
            });
        }

        if !self.name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "must contain only alphanumeric characters, hyphens, and underscores"
                    .to_string(),
            });
        }

        if self.version.is_empty() {
            return Err(ParseError::InvalidField {
                field: "version",
                reason: "plugin version is required".to_string(),
            });
        }

        let parts: Vec<&str> = self.version.split('.').collect();
        if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(ParseError::InvalidField {
                field: "version",
                reason: format!("'{}' is not in major.minor[.patch] form", self.version),
            });
        }

        if let Some(slice) = &self.slice {
            if slice.trim().is_empty() {
                return Err(ParseError::InvalidField {
                    field: "slice",
                    reason: "slice id must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Check the declared host requirement against `host`.
    ///
    /// A missing requirement is compatible. A requirement that is not valid
    /// semver is logged and treated as compatible.
    pub fn check_host(&self, host: &semver::Version) -> Result<(), ParseError> {
        let Some(required) = self.dependencies.host_version.as_deref() else {
            return Ok(());
        };

        match semver::VersionReq::parse(required) {
            Ok(req) if req.matches(host) => Ok(()),
            Ok(_) => Err(ParseError::IncompatibleHost {
                name: self.name.clone(),
                required: required.to_string(),
                host: host.to_string(),
            }),
            Err(e) => {
                tracing::warn!(
                    plugin = %self.name,
                    requirement = required,
                    error = %e,
                    "Ignoring unparseable host version requirement"
                );
                Ok(())
            }
        }
    }

    /// Decode each component into a descriptor, dropping rejected ones.
    pub fn descriptors(&self, source_path: &str) -> Vec<PluginDescriptor> {
        self.components
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| match self.decode_component(raw, source_path) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    tracing::warn!(
                        plugin = %self.name,
                        component = index,
                        source = source_path,
                        error = %e,
                        "Rejected plugin component"
                    );
                    None
                }
            })
            .collect()
    }

    fn decode_component(
        &self,
        raw: &Value,
        source_path: &str,
    ) -> Result<PluginDescriptor, ComponentRejection> {
        let spec: PluginComponentSpec = serde_json::from_value(raw.clone())
            .map_err(|e| ComponentRejection::Malformed(e.to_string()))?;

        let area: Area = spec.area.parse()?;
        let component_type: ComponentType = spec.component_type.parse()?;

        if spec.module.trim().is_empty() {
            return Err(ComponentRejection::Malformed("module path is empty".to_string()));
        }

        Ok(PluginDescriptor {
            name: self.name.clone(),
            version: self.version.clone(),
            area,
            component_type,
            module_path: spec.module,
            source_path: source_path.to_string(),
            slice: self.slice.clone(),
            digest: spec.sha256.map(|d| d.to_ascii_lowercase()),
        })
    }
}
