//! Activation policy - which initialized plugins get activated
//!
//! Stored as TOML next to the grant store. Hard-locked and
//! non-disableable plugins bypass the policy entirely; experimental
//! plugins additionally need the global experimental flag.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use alcove_plugin_api::PluginMetadata;

use super::error::PluginHostError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// `plugins` is a deny-list; everything else activates
    #[default]
    Blacklist,
    /// `plugins` is an allow-list; everything else stays initialized
    Whitelist,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PluginPolicy {
    #[serde(default)]
    pub mode: PolicyMode,
    /// Interpreted per `mode`
    #[serde(default)]
    pub plugins: HashSet<String>,
    /// Global gate for plugins marked experimental
    #[serde(default)]
    pub allow_experimental: bool,
}

impl PluginPolicy {
    /// Load from a TOML file; missing file yields the default policy
    pub fn load(path: &Path) -> Result<Self, PluginHostError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PluginHostError::Store(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), PluginHostError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| PluginHostError::Store(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Whether an initialized plugin should be activated
    pub fn should_activate(&self, metadata: &PluginMetadata) -> bool {
        if metadata.hard_locked || !metadata.can_disable {
            return true;
        }
        if metadata.experimental && !self.allow_experimental {
            return false;
        }
        match self.mode {
            PolicyMode::Whitelist => self.plugins.contains(&metadata.id),
            PolicyMode::Blacklist => !self.plugins.contains(&metadata.id),
        }
    }

    pub fn enable(&mut self, plugin_id: &str) {
        match self.mode {
            PolicyMode::Whitelist => {
                self.plugins.insert(plugin_id.to_string());
            }
            PolicyMode::Blacklist => {
                self.plugins.remove(plugin_id);
            }
        }
    }

    pub fn disable(&mut self, plugin_id: &str) {
        match self.mode {
            PolicyMode::Whitelist => {
                self.plugins.remove(plugin_id);
            }
            PolicyMode::Blacklist => {
                self.plugins.insert(plugin_id.to_string());
            }
        }
    }

    pub fn is_enabled(&self, plugin_id: &str) -> bool {
        match self.mode {
            PolicyMode::Whitelist => self.plugins.contains(plugin_id),
            PolicyMode::Blacklist => !self.plugins.contains(plugin_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metadata(id: &str) -> PluginMetadata {
        PluginMetadata {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn default_blacklist_activates_everything() {
        let policy = PluginPolicy::default();
        assert!(policy.should_activate(&metadata("notes")));
    }

    #[test]
    fn blacklist_mode_blocks_listed() {
        let mut policy = PluginPolicy::default();
        policy.disable("notes");
        assert!(!policy.should_activate(&metadata("notes")));
        assert!(policy.should_activate(&metadata("tasks")));
    }

    #[test]
    fn whitelist_mode_blocks_unlisted() {
        let mut policy = PluginPolicy {
            mode: PolicyMode::Whitelist,
            ..Default::default()
        };
        policy.enable("notes");
        assert!(policy.should_activate(&metadata("notes")));
        assert!(!policy.should_activate(&metadata("tasks")));
    }

    #[test]
    fn hard_locked_ignores_policy() {
        let mut policy = PluginPolicy {
            mode: PolicyMode::Whitelist,
            ..Default::default()
        };
        policy.disable("system");

        let mut system = metadata("system");
        system.hard_locked = true;
        assert!(policy.should_activate(&system));

        let mut pinned = metadata("pinned");
        pinned.can_disable = false;
        assert!(policy.should_activate(&pinned));
    }

    #[test]
    fn experimental_needs_global_flag() {
        let mut experimental = metadata("labs");
        experimental.experimental = true;

        let mut policy = PluginPolicy::default();
        assert!(!policy.should_activate(&experimental));

        policy.allow_experimental = true;
        assert!(policy.should_activate(&experimental));
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.toml");

        let mut policy = PluginPolicy::default();
        policy.disable("notes");
        policy.allow_experimental = true;
        policy.save(&path).unwrap();

        let loaded = PluginPolicy::load(&path).unwrap();
        assert!(!loaded.is_enabled("notes"));
        assert!(loaded.allow_experimental);
        assert_eq!(loaded.mode, PolicyMode::Blacklist);
    }

    #[test]
    fn load_missing_file_is_default() {
        let policy = PluginPolicy::load(Path::new("/nonexistent/policy.toml")).unwrap();
        assert!(policy.is_enabled("anything"));
    }
}
