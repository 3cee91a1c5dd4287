//! Core plugin types.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::UnknownExtensionKind;

/// Where in the host UI a plugin component may be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Area {
    /// Global application bar.
    AppBar,
    /// Toolbar of a list or detail view.
    Toolbar,
    /// Home dashboard.
    Dashboard,
    /// Stock line edit view.
    StockLine,
    /// Internal order (request requisition) lines.
    RequestRequisitionLine,
    /// App bar of the inbound shipment detail view.
    InboundShipmentAppBar,
}

impl Area {
    /// All known areas.
    pub const ALL: [Self; 6] = [
        Self::AppBar,
        Self::Toolbar,
        Self::Dashboard,
        Self::StockLine,
        Self::RequestRequisitionLine,
        Self::InboundShipmentAppBar,
    ];

    /// The manifest spelling of this area.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppBar => "AppBar",
            Self::Toolbar => "Toolbar",
            Self::Dashboard => "Dashboard",
            Self::StockLine => "StockLine",
            Self::RequestRequisitionLine => "RequestRequisitionLine",
            Self::InboundShipmentAppBar => "InboundShipmentAppBar",
        }
    }
}

impl FromStr for Area {
    type Err = UnknownExtensionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|area| area.as_str() == s)
            .ok_or_else(|| UnknownExtensionKind { kind: "area", value: s.to_string() })
    }
}

impl std::fmt::Display for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of component a plugin contributes to an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentType {
    /// Plain component with no further specialisation.
    None,
    /// Extra field in an edit view.
    EditViewField,
    /// Extra column in a data table.
    TableColumn,
    /// Dashboard widget.
    Widget,
}

impl ComponentType {
    /// All known component types.
    pub const ALL: [Self; 4] = [Self::None, Self::EditViewField, Self::TableColumn, Self::Widget];

    /// The manifest spelling of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::EditViewField => "EditViewField",
            Self::TableColumn => "TableColumn",
            Self::Widget => "Widget",
        }
    }
}

impl FromStr for ComponentType {
    type Err = UnknownExtensionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownExtensionKind { kind: "type", value: s.to_string() })
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An `(area, type)` pair identifying a registry bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExtensionPoint {
    pub area: Area,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
}

impl ExtensionPoint {
    pub fn new(area: Area, component_type: ComponentType) -> Self {
        Self { area, component_type }
    }
}

impl std::fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.area, self.component_type)
    }
}

/// A validated extension point contributed by a plugin.
///
/// One manifest can produce several descriptors, one per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Plugin name. De-duplication key across reloads.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Target area.
    pub area: Area,
    /// Component type within the area.
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    /// Module path relative to the plugin's source path.
    pub module_path: String,
    /// Catalog path the manifest was found at.
    pub source_path: String,
    /// State slice id declared by the plugin, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice: Option<String>,
    /// Expected hex SHA-256 of the module bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl PluginDescriptor {
    /// The registry bucket this descriptor belongs to.
    pub fn extension_point(&self) -> ExtensionPoint {
        ExtensionPoint::new(self.area, self.component_type)
    }

    /// Module path with any leading `./` removed.
    pub fn normalized_module_path(&self) -> &str {
        normalize_module_path(&self.module_path)
    }
}

pub(crate) fn normalize_module_path(path: &str) -> &str {
    let mut path = path;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.trim_start_matches('/')
}

/// How plugin modules are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Bundles served by the plugin host (production).
    Remote,
    /// Modules read from a local plugin checkout (development).
    Local,
}

impl Default for LoadMode {
    fn default() -> Self {
        Self::Remote
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "local" | "dev" => Ok(Self::Local),
            other => Err(format!("unknown load mode '{other}' (expected 'remote' or 'local')")),
        }
    }
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => f.write_str("remote"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// Host version reported to plugins for compatibility checks.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Manifest file name inside a local plugin directory.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Environment variable selecting the load mode.
pub const MODE_ENV_VAR: &str = "PLUGIN_COMPOSER_MODE";
