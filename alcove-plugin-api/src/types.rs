//! Plugin metadata and capability surface types

use serde::{Deserialize, Serialize};

/// Metadata describing a plugin to the host.
///
/// For native plugins this comes from [`crate::Plugin::metadata`]; for
/// sandboxed plugins it is derived from the unit's manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique, stable plugin id (e.g. `app.alcove.notes`)
    pub id: String,
    /// Human-readable display name
    pub name: String,
    /// Plugin version (semver)
    pub version: String,
    /// API version this plugin was built against
    pub api_version: u32,
    /// Human-readable description
    pub description: String,
    /// Plugin author
    pub author: String,
    /// Category used for grouping in the shell
    pub category: PluginCategory,
    /// Sort order for the navigation sidebar
    pub navigation_order: i32,
    /// Whether the user may disable this plugin
    pub can_disable: bool,
    /// Hard-locked plugins always activate and reject disable attempts
    pub hard_locked: bool,
    /// Experimental plugins activate only when the global experimental flag is set
    pub experimental: bool,
    /// Capability names this plugin declares beyond the tier-1 set
    pub capabilities: Vec<String>,
    /// Entity schemas this plugin registers with the data backend
    pub schemas: Vec<EntitySchema>,
}

impl Default for PluginMetadata {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            version: "0.0.1".to_string(),
            api_version: crate::API_VERSION,
            description: String::new(),
            author: String::new(),
            category: PluginCategory::default(),
            navigation_order: 100,
            can_disable: true,
            hard_locked: false,
            experimental: false,
            capabilities: Vec::new(),
            schemas: Vec::new(),
        }
    }
}

/// Shell grouping category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    Productivity,
    Knowledge,
    Finance,
    Health,
    System,
    #[default]
    Utility,
}

/// Schema for an entity type a plugin stores through the data backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type name, unique per plugin (e.g. `note`)
    pub entity_type: String,
    /// Fields the backend should index
    #[serde(default)]
    pub indexed_fields: Vec<IndexedField>,
}

/// A field the backend indexes for querying
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedField {
    /// JSON pointer into the entity payload (e.g. `/title`)
    pub field_path: String,
    /// Field type for index construction
    pub field_type: FieldType,
    /// Whether the field participates in full-text search
    #[serde(default)]
    pub searchable: bool,
}

/// Index field types understood by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Boolean,
}

/// Descriptor for a sidebar entry contributed by an active plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationItem {
    /// Navigation id, unique across plugins
    pub id: String,
    /// Sidebar sort order
    pub order: i32,
    /// Display label
    pub label: String,
    /// Icon name from the shell's icon set
    pub icon: Option<String>,
}

/// A command a plugin contributes to the shell's command palette
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    /// Command id, namespaced by the registry under the plugin id
    pub id: String,
    /// Display title
    pub title: String,
    /// Optional keyboard shortcut (e.g. `mod+shift+n`)
    pub shortcut: Option<String>,
}

/// Storage metrics a plugin reports for the shell's usage view
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataMetrics {
    /// Number of entities owned by this plugin
    pub entity_count: u64,
    /// Estimated disk usage in bytes
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_default_api_version() {
        let meta = PluginMetadata::default();
        assert_eq!(meta.api_version, crate::API_VERSION);
        assert!(meta.can_disable);
        assert!(!meta.hard_locked);
    }

    #[test]
    fn metadata_toml_roundtrip() {
        let meta = PluginMetadata {
            id: "app.alcove.notes".to_string(),
            name: "Notes".to_string(),
            category: PluginCategory::Productivity,
            capabilities: vec!["network".to_string()],
            schemas: vec![EntitySchema {
                entity_type: "note".to_string(),
                indexed_fields: vec![IndexedField {
                    field_path: "/title".to_string(),
                    field_type: FieldType::Text,
                    searchable: true,
                }],
            }],
            ..Default::default()
        };

        let toml_str = toml::to_string(&meta).expect("serialize");
        let parsed: PluginMetadata = toml::from_str(&toml_str).expect("parse");

        assert_eq!(parsed.id, meta.id);
        assert_eq!(parsed.schemas.len(), 1);
        assert_eq!(parsed.schemas[0].indexed_fields[0].field_path, "/title");
    }

    #[test]
    fn navigation_item_equality() {
        let a = NavigationItem {
            id: "notes".to_string(),
            order: 10,
            label: "Notes".to_string(),
            icon: None,
        };
        assert_eq!(a, a.clone());
    }
}
