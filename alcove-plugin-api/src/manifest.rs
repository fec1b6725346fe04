//! Plugin manifest - on-disk metadata for sandboxed and packaged units
//!
//! Native plugins report metadata through [`crate::Plugin::metadata`].
//! Sandboxed units carry a `plugin.toml` sidecar instead, and single-file
//! packages embed the same manifest as JSON in a module custom section.

use serde::{Deserialize, Serialize};

use crate::error::PluginError;
use crate::types::{EntitySchema, NavigationItem, PluginCategory, PluginMetadata};

/// Parsed plugin manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub plugin: ManifestPlugin,
    /// Entity schemas; may also come from a `schema.json` sidecar
    #[serde(default)]
    pub schemas: Vec<EntitySchema>,
    /// Sidebar entry this plugin contributes while active
    #[serde(default)]
    pub navigation: Option<NavigationItem>,
}

/// The `[plugin]` table of a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPlugin {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub category: PluginCategory,
    #[serde(default = "default_navigation_order")]
    pub navigation_order: i32,
    #[serde(default = "default_true")]
    pub can_disable: bool,
    #[serde(default)]
    pub hard_locked: bool,
    #[serde(default)]
    pub experimental: bool,
    /// Capability names declared beyond the tier-1 set
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Optional SHA-256 of the module file, verified at load time
    #[serde(default)]
    pub checksum: Option<String>,
}

fn default_navigation_order() -> i32 {
    100
}

fn default_true() -> bool {
    true
}

impl PluginManifest {
    /// Parse a manifest from TOML (sidecar form)
    pub fn from_toml(content: &str) -> Result<Self, PluginError> {
        toml::from_str(content).map_err(|e| PluginError::Serialization(e.to_string()))
    }

    /// Parse a manifest from JSON (embedded form)
    pub fn from_json(content: &str) -> Result<Self, PluginError> {
        serde_json::from_str(content).map_err(PluginError::Json)
    }

    /// Convert to the runtime metadata the registry tracks
    pub fn to_metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: self.plugin.id.clone(),
            name: self.plugin.name.clone(),
            version: self.plugin.version.clone(),
            api_version: crate::API_VERSION,
            description: self.plugin.description.clone(),
            author: self.plugin.author.clone(),
            category: self.plugin.category,
            navigation_order: self.plugin.navigation_order,
            can_disable: self.plugin.can_disable,
            hard_locked: self.plugin.hard_locked,
            experimental: self.plugin.experimental,
            capabilities: self.plugin.capabilities.clone(),
            schemas: self.schemas.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
[plugin]
id = "app.alcove.notes"
name = "Notes"
version = "1.2.0"
description = "Plain-text notes"
category = "productivity"
navigation_order = 10
capabilities = ["network"]

[[schemas]]
entity_type = "note"

[[schemas.indexed_fields]]
field_path = "/title"
field_type = "text"
searchable = true
"#;

    #[test]
    fn parse_full_manifest() {
        let manifest = PluginManifest::from_toml(MANIFEST).unwrap();
        assert_eq!(manifest.plugin.id, "app.alcove.notes");
        assert_eq!(manifest.plugin.navigation_order, 10);
        assert!(manifest.plugin.can_disable);
        assert!(!manifest.plugin.hard_locked);
        assert_eq!(manifest.schemas.len(), 1);
        assert_eq!(manifest.schemas[0].entity_type, "note");
    }

    #[test]
    fn minimal_manifest_defaults() {
        let manifest = PluginManifest::from_toml(
            r#"
[plugin]
id = "app.alcove.mini"
name = "Mini"
version = "0.1.0"
"#,
        )
        .unwrap();
        assert!(manifest.plugin.can_disable);
        assert_eq!(manifest.plugin.navigation_order, 100);
        assert!(manifest.plugin.capabilities.is_empty());
        assert!(manifest.schemas.is_empty());
    }

    #[test]
    fn to_metadata_carries_flags() {
        let manifest = PluginManifest::from_toml(
            r#"
[plugin]
id = "app.alcove.sys"
name = "System"
version = "0.1.0"
can_disable = false
hard_locked = true
"#,
        )
        .unwrap();
        let meta = manifest.to_metadata();
        assert!(!meta.can_disable);
        assert!(meta.hard_locked);
    }

    #[test]
    fn json_form_parses() {
        let manifest = PluginManifest::from_json(
            r#"{"plugin": {"id": "app.alcove.pack", "name": "Pack", "version": "0.1.0"}}"#,
        )
        .unwrap();
        assert_eq!(manifest.plugin.id, "app.alcove.pack");
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(PluginManifest::from_toml("not a manifest").is_err());
    }
}
