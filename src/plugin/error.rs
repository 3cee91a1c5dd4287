//! Plugin system error types.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors produced while turning a raw manifest into descriptors.
///
/// A manifest that hits any of these is dropped as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The manifest is not JSON, or not a JSON object of the expected shape.
    #[error("Malformed plugin manifest: {0}")]
    MalformedManifest(String),

    /// A required top-level field is absent.
    #[error("Plugin manifest is missing required field '{0}'")]
    MissingField(&'static str),

    /// A field is present but its value is unacceptable.
    #[error("Invalid manifest field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The plugin was built against a host version range we do not satisfy.
    #[error("Plugin '{name}' requires host {required}, but host is {host}")]
    IncompatibleHost { name: String, required: String, host: String },
}

/// An area or component type string outside the closed enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown extension {kind} '{value}'")]
pub struct UnknownExtensionKind {
    /// Which enumeration rejected the value ("area" or "type").
    pub kind: &'static str,
    /// The offending value as it appeared in the manifest.
    pub value: String,
}

/// Errors that can occur while loading and composing plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin module not found.
    #[error("Plugin module not found: {0}")]
    NotFound(PathBuf),

    /// The plugin is not part of the local module namespace.
    #[error("Plugin '{0}' is not present in the local module namespace")]
    NotDiscovered(String),

    /// Manifest could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Plugin loading failed.
    #[error("Failed to load plugin: {0}")]
    LoadError(String),

    /// Plugin timed out while loading.
    #[error("Plugin '{0}' timed out after {1:?}")]
    Timeout(String, Duration),

    /// The plugin's composition task panicked.
    #[error("Plugin '{0}' panicked during composition")]
    Panicked(String),

    /// A load shared by several callers failed.
    #[error("{0}")]
    Coalesced(Arc<PluginError>),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (catalog or bundle fetch).
    #[error("Network error: {0}")]
    Network(String),

    /// Validation error (e.g., digest mismatch).
    #[error("Validation error: {0}")]
    Validation(String),
}

impl PluginError {
    /// Unwrap coalesced errors down to the failure that actually happened.
    pub fn root(&self) -> &Self {
        match self {
            Self::Coalesced(inner) => inner.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        assert_eq!(
            ParseError::MissingField("components").to_string(),
            "Plugin manifest is missing required field 'components'"
        );
    }

    #[test]
    fn test_unknown_kind_display() {
        let err = UnknownExtensionKind { kind: "area", value: "Nonexistent".to_string() };
        assert_eq!(err.to_string(), "Unknown extension area 'Nonexistent'");
    }

    #[test]
    fn test_coalesced_root() {
        let inner = Arc::new(PluginError::Timeout("slow".to_string(), Duration::from_secs(5)));
        let outer = PluginError::Coalesced(Arc::clone(&inner));
        assert!(matches!(outer.root(), PluginError::Timeout(name, limit)
            if name == "slow" && limit.as_secs() == 5));
        assert_eq!(outer.to_string(), inner.to_string());
    }

    #[test]
    fn test_parse_error_converts() {
        let err: PluginError = ParseError::MalformedManifest("eof".to_string()).into();
        assert!(matches!(err, PluginError::Parse(ParseError::MalformedManifest(_))));
    }
}
