//! Capability grant engine - decides, prompts for, and persists per-plugin grants
//!
//! Every plugin receives the tier-1 capabilities unconditionally. Anything
//! else it declares is put to the user exactly once: decisions are
//! write-once-then-sticky, persisted per (plugin id, capability), and
//! carried forward across loads. Only newly declared, undecided
//! capabilities are ever prompted.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use alcove_plugin_api::PluginMetadata;

use super::error::PluginHostError;

/// Capabilities every plugin receives without prompting
pub const TIER1_CAPABILITIES: &[&str] = &[
    "data-storage",
    "settings",
    "logging",
    "navigation",
    "view-refresh",
];

/// Prompt text for well-known capabilities; undescribed ones fall back to
/// a generic line naming the capability.
fn describe_capability(name: &str) -> String {
    match name {
        "network" => "Access the network to fetch or send data".to_string(),
        "vault" => "Read and write entries in your encrypted vault".to_string(),
        "linking" => "Create links between items owned by other plugins".to_string(),
        "dialogs" => "Show dialogs and file pickers".to_string(),
        "clipboard" => "Read and write the system clipboard".to_string(),
        other => format!("Use the '{other}' capability"),
    }
}

/// The shell-implemented allow/deny prompt
pub trait PermissionPrompt: Send + Sync {
    /// Ask the user to allow or deny one capability for one plugin
    fn request(&self, plugin_name: &str, capability: &str, description: &str) -> bool;
}

/// Per-plugin grant decisions
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GrantState {
    #[serde(default)]
    pub granted: HashSet<String>,
    #[serde(default)]
    pub denied: HashSet<String>,
    /// Reserved for runtime just-in-time escalation; never populated today
    #[serde(default)]
    pub pending_jit: HashSet<String>,
}

impl GrantState {
    fn is_decided(&self, capability: &str) -> bool {
        self.granted.contains(capability) || self.denied.contains(capability)
    }
}

/// On-disk grant store, one table per plugin id
#[derive(Debug, Default, Serialize, Deserialize)]
struct GrantStore {
    #[serde(default)]
    plugins: HashMap<String, GrantState>,
}

impl GrantStore {
    fn load(path: &Path) -> Result<Self, PluginHostError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PluginHostError::Store(e.to_string()))
    }

    fn save(&self, path: &Path) -> Result<(), PluginHostError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| PluginHostError::Store(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// The grant engine the registry consults at plugin load time
pub struct GrantEngine {
    path: PathBuf,
    store: Mutex<GrantStore>,
    prompt: Arc<dyn PermissionPrompt>,
}

impl GrantEngine {
    /// Load persisted grants from `path`, prompting through `prompt` for
    /// undecided capabilities.
    pub fn load(path: &Path, prompt: Arc<dyn PermissionPrompt>) -> Result<Self, PluginHostError> {
        Ok(Self {
            path: path.to_path_buf(),
            store: Mutex::new(GrantStore::load(path)?),
            prompt,
        })
    }

    /// Resolve the effective grant set for a plugin: prompt for each
    /// declared, not-yet-decided capability, persist the decisions, and
    /// return tier-1 ∪ granted − denied.
    pub fn resolve(&self, metadata: &PluginMetadata) -> Result<HashSet<String>, PluginHostError> {
        let undecided: Vec<String> = {
            let mut store = self.store.lock();
            let state = store.plugins.entry(metadata.id.clone()).or_default();
            metadata
                .capabilities
                .iter()
                .filter(|c| {
                    !TIER1_CAPABILITIES.contains(&c.as_str()) && !state.is_decided(c)
                })
                .cloned()
                .collect()
        };

        // The prompt is a modal dialog in the shell; it must not hold the
        // store lock while the user thinks.
        let mut decisions = Vec::with_capacity(undecided.len());
        for capability in undecided {
            let allowed =
                self.prompt
                    .request(&metadata.name, &capability, &describe_capability(&capability));
            info!(
                plugin = %metadata.id,
                capability = %capability,
                allowed,
                "Capability decision recorded"
            );
            decisions.push((capability, allowed));
        }

        let mut store = self.store.lock();
        let state = store.plugins.entry(metadata.id.clone()).or_default();

        let mut changed = false;
        for (capability, allowed) in decisions {
            // A concurrent resolve may have decided the capability while
            // the prompt was open; the first decision sticks.
            if state.is_decided(&capability) {
                continue;
            }
            if allowed {
                state.granted.insert(capability);
            } else {
                state.denied.insert(capability);
            }
            changed = true;
        }

        let mut effective: HashSet<String> = TIER1_CAPABILITIES
            .iter()
            .map(|s| s.to_string())
            .collect();
        effective.extend(state.granted.iter().cloned());
        for denied in &state.denied {
            effective.remove(denied);
        }

        if changed {
            store.save(&self.path)?;
        } else {
            debug!(plugin = %metadata.id, "No new capability decisions needed");
        }

        Ok(effective)
    }

    /// Whether a capability is currently granted to a plugin (tier-1
    /// capabilities always are, unless explicitly denied)
    pub fn is_granted(&self, plugin_id: &str, capability: &str) -> bool {
        let store = self.store.lock();
        let Some(state) = store.plugins.get(plugin_id) else {
            return TIER1_CAPABILITIES.contains(&capability);
        };
        if state.denied.contains(capability) {
            return false;
        }
        TIER1_CAPABILITIES.contains(&capability) || state.granted.contains(capability)
    }

    /// Snapshot of the persisted decisions for a plugin
    pub fn grant_state(&self, plugin_id: &str) -> GrantState {
        self.store
            .lock()
            .plugins
            .get(plugin_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Prompt that allows everything; used for headless and test setups
pub struct AllowAllPrompt;

impl PermissionPrompt for AllowAllPrompt {
    fn request(&self, _plugin_name: &str, _capability: &str, _description: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct ScriptedPrompt {
        allow: bool,
        asked: AtomicUsize,
    }

    impl ScriptedPrompt {
        fn new(allow: bool) -> Arc<Self> {
            Arc::new(Self {
                allow,
                asked: AtomicUsize::new(0),
            })
        }
    }

    impl PermissionPrompt for ScriptedPrompt {
        fn request(&self, _plugin: &str, _capability: &str, _description: &str) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.allow
        }
    }

    fn metadata_with_caps(caps: &[&str]) -> PluginMetadata {
        PluginMetadata {
            id: "app.alcove.test".to_string(),
            name: "Test".to_string(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn tier1_granted_without_prompting() {
        let dir = TempDir::new().unwrap();
        let prompt = ScriptedPrompt::new(true);
        let engine = GrantEngine::load(&dir.path().join("grants.toml"), prompt.clone()).unwrap();

        let effective = engine.resolve(&metadata_with_caps(&[])).unwrap();
        assert!(effective.contains("data-storage"));
        assert!(effective.contains("settings"));
        assert!(effective.contains("navigation"));
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn declared_capability_prompted_once_and_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grants.toml");
        let meta = metadata_with_caps(&["network"]);

        let prompt = ScriptedPrompt::new(false);
        let engine = GrantEngine::load(&path, prompt.clone()).unwrap();

        let effective = engine.resolve(&meta).unwrap();
        assert!(!effective.contains("network"));
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);

        // Second resolve on the same engine: no re-prompt
        engine.resolve(&meta).unwrap();
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);

        // Fresh engine from disk (next load): the denial carries forward
        // and is still not re-prompted, even with an allow-happy prompt
        let eager = ScriptedPrompt::new(true);
        let reloaded = GrantEngine::load(&path, eager.clone()).unwrap();
        let effective = reloaded.resolve(&meta).unwrap();
        assert!(!effective.contains("network"));
        assert_eq!(eager.asked.load(Ordering::SeqCst), 0);
        assert!(!reloaded.is_granted("app.alcove.test", "network"));
    }

    #[test]
    fn newly_declared_capability_prompts_on_later_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grants.toml");

        let prompt = ScriptedPrompt::new(true);
        let engine = GrantEngine::load(&path, prompt.clone()).unwrap();
        engine.resolve(&metadata_with_caps(&["network"])).unwrap();
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);

        // Plugin update declares one more capability: only that one prompts
        let engine = GrantEngine::load(&path, prompt.clone()).unwrap();
        let effective = engine
            .resolve(&metadata_with_caps(&["network", "clipboard"]))
            .unwrap();
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 2);
        assert!(effective.contains("network"));
        assert!(effective.contains("clipboard"));
    }

    #[test]
    fn granted_set_includes_tier1_and_grants() {
        let dir = TempDir::new().unwrap();
        let engine =
            GrantEngine::load(&dir.path().join("grants.toml"), ScriptedPrompt::new(true)).unwrap();

        let effective = engine.resolve(&metadata_with_caps(&["network"])).unwrap();
        assert!(effective.contains("network"));
        assert!(effective.contains("logging"));
        assert!(engine.is_granted("app.alcove.test", "network"));
        assert!(engine.is_granted("app.alcove.test", "settings"));
        assert!(!engine.is_granted("app.alcove.test", "vault"));
    }

    #[test]
    fn store_stays_readable_while_prompt_is_open() {
        // The prompt blocks on the user in the real shell; other callers
        // must still be able to query grants while it is up.
        #[derive(Default)]
        struct QueryingPrompt {
            engine: Mutex<Option<Arc<GrantEngine>>>,
            queried: AtomicUsize,
        }

        impl PermissionPrompt for QueryingPrompt {
            fn request(&self, _plugin: &str, _capability: &str, _description: &str) -> bool {
                if let Some(engine) = self.engine.lock().as_ref() {
                    assert!(engine.is_granted("app.alcove.test", "settings"));
                    let state = engine.grant_state("app.alcove.test");
                    assert!(!state.granted.contains("network"));
                    self.queried.fetch_add(1, Ordering::SeqCst);
                }
                true
            }
        }

        let dir = TempDir::new().unwrap();
        let prompt = Arc::new(QueryingPrompt::default());
        let engine = Arc::new(
            GrantEngine::load(&dir.path().join("grants.toml"), prompt.clone()).unwrap(),
        );
        *prompt.engine.lock() = Some(Arc::clone(&engine));

        let effective = engine.resolve(&metadata_with_caps(&["network"])).unwrap();
        assert_eq!(prompt.queried.load(Ordering::SeqCst), 1);
        assert!(effective.contains("network"));
    }

    #[test]
    fn pending_jit_stays_empty() {
        let dir = TempDir::new().unwrap();
        let engine =
            GrantEngine::load(&dir.path().join("grants.toml"), ScriptedPrompt::new(true)).unwrap();
        engine.resolve(&metadata_with_caps(&["network"])).unwrap();

        let state = engine.grant_state("app.alcove.test");
        assert!(state.pending_jit.is_empty());
    }
}
