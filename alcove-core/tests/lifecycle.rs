//! End-to-end plugin host tests
//!
//! These drive a real on-disk plugin layout through the registry:
//! discovery, grant resolution, activation policy, navigation, the data
//! bridge, and workspace switching.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use alcove_core::plugins::{
    AllowAllPrompt, InlineDispatcher, PermissionPrompt, PluginRegistry, PluginState,
    RegistryConfig,
};
use alcove_core::sdk::{DataBackend, SyncNotifier};
use alcove_plugin_api::{SdkAction, SdkRequest, SdkResponse};

/// Minimal wasm module: magic + version, no sections
const EMPTY_WASM: &[u8] = &[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

fn write_journal_unit(plugins_dir: &Path) {
    let unit = plugins_dir.join("journal");
    std::fs::create_dir_all(&unit).unwrap();
    std::fs::write(unit.join("journal.wasm"), EMPTY_WASM).unwrap();
    std::fs::write(
        unit.join("plugin.toml"),
        r#"
[plugin]
id = "app.alcove.journal"
name = "Journal"
version = "0.2.0"
capabilities = ["data-storage"]

[navigation]
id = "journal"
order = 20
label = "Journal"

[[schemas]]
entity_type = "entry"
indexed_fields = []
"#,
    )
    .unwrap();
    std::fs::write(
        unit.join("commands.toml"),
        r#"
[[commands]]
id = "journal.new-entry"
title = "New Journal Entry"
"#,
    )
    .unwrap();
}

fn registry_in(root: &TempDir, prompt: Arc<dyn PermissionPrompt>) -> PluginRegistry {
    PluginRegistry::new(
        RegistryConfig {
            bundled_dir: None,
            user_dir: root.path().join("plugins"),
            state_dir: root.path().join("state"),
        },
        prompt,
        Arc::new(InlineDispatcher),
    )
    .unwrap()
}

/// Backend that remembers every request and answers with a fixed count
struct CountingBackend {
    requests: Mutex<Vec<SdkRequest>>,
    count: u64,
}

impl CountingBackend {
    fn new(count: u64) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            count,
        }
    }
}

impl DataBackend for CountingBackend {
    fn invoke(&self, request_json: &str) -> Option<String> {
        let request: SdkRequest = serde_json::from_str(request_json).ok()?;
        self.requests.lock().unwrap().push(request);
        let response = SdkResponse::ok(Some(serde_json::json!({ "count": self.count })));
        serde_json::to_string(&response).ok()
    }
}

struct RecordingNotifier {
    changes: Mutex<Vec<(String, String)>>,
}

impl SyncNotifier for RecordingNotifier {
    fn entity_changed(
        &self,
        plugin_id: &str,
        entity_type: &str,
        _entity_id: Option<&str>,
        _snapshot: &serde_json::Value,
    ) {
        self.changes
            .lock()
            .unwrap()
            .push((plugin_id.to_string(), entity_type.to_string()));
    }
}

#[test]
fn on_disk_unit_reaches_active_with_surfaces() {
    let root = TempDir::new().unwrap();
    write_journal_unit(&root.path().join("plugins"));
    let mut registry = registry_in(&root, Arc::new(AllowAllPrompt));

    let discovered = registry.discover();
    assert_eq!(discovered, ["app.alcove.journal"]);
    assert_eq!(registry.initialize(), 1);
    let active = registry.activate_by_policy().unwrap();
    assert_eq!(active, ["app.alcove.journal"]);

    assert_eq!(
        registry.state_of("app.alcove.journal"),
        Some(PluginState::Active)
    );
    assert_eq!(registry.navigation().len(), 1);
    assert_eq!(
        registry.plugin_owning_nav("journal"),
        Some("app.alcove.journal")
    );
    assert_eq!(
        registry
            .command_registry()
            .find("journal.new-entry")
            .unwrap()
            .plugin_id,
        "app.alcove.journal"
    );
}

#[test]
fn rediscovery_is_idempotent() {
    let root = TempDir::new().unwrap();
    write_journal_unit(&root.path().join("plugins"));
    let mut registry = registry_in(&root, Arc::new(AllowAllPrompt));

    assert_eq!(registry.discover().len(), 1);
    assert!(registry.discover().is_empty());
    assert_eq!(registry.plugins().len(), 1);
}

#[test]
fn schemas_registered_with_backend_at_initialize() {
    let root = TempDir::new().unwrap();
    write_journal_unit(&root.path().join("plugins"));
    let mut registry = registry_in(&root, Arc::new(AllowAllPrompt));

    let backend = Arc::new(CountingBackend::new(0));
    registry.sdk().set_backend(Arc::clone(&backend) as Arc<dyn DataBackend>);

    registry.discover();
    registry.initialize();

    let requests = backend.requests.lock().unwrap();
    assert!(requests.iter().any(|r| {
        r.plugin_id == "app.alcove.journal"
            && r.action == SdkAction::Command
            && r.entity_type == "entry"
            && r.parameters.get("command").map(String::as_str) == Some("register_schema")
    }));
}

#[test]
fn data_metrics_flow_through_the_bridge() {
    let root = TempDir::new().unwrap();
    write_journal_unit(&root.path().join("plugins"));
    let mut registry = registry_in(&root, Arc::new(AllowAllPrompt));

    let backend = Arc::new(CountingBackend::new(42));
    registry.sdk().set_backend(Arc::clone(&backend) as Arc<dyn DataBackend>);

    registry.discover();
    registry.initialize();
    registry.activate_by_policy().unwrap();

    let metrics = registry.data_metrics("app.alcove.journal").unwrap();
    assert_eq!(metrics.entity_count, 42);
}

#[test]
fn workspace_switch_swaps_backend_for_new_requests() {
    let root = TempDir::new().unwrap();
    write_journal_unit(&root.path().join("plugins"));
    let mut registry = registry_in(&root, Arc::new(AllowAllPrompt));

    let old = Arc::new(CountingBackend::new(1));
    registry.sdk().set_backend(Arc::clone(&old) as Arc<dyn DataBackend>);
    registry.discover();
    registry.initialize();
    registry.activate_by_policy().unwrap();

    let fresh = Arc::new(CountingBackend::new(7));
    {
        let mut guard = registry.sdk().begin_workspace_switch().unwrap();
        assert!(guard.take_backend().is_some());
        guard.set_backend(Arc::clone(&fresh) as Arc<dyn DataBackend>);
    }
    assert!(!registry.sdk().is_switching());

    let metrics = registry.data_metrics("app.alcove.journal").unwrap();
    assert_eq!(metrics.entity_count, 7);
    // The count query after the switch hit the fresh backend
    assert!(!fresh.requests.lock().unwrap().is_empty());
}

#[test]
fn mutations_notify_sync_collaborator() {
    let root = TempDir::new().unwrap();
    let registry = registry_in(&root, Arc::new(AllowAllPrompt));

    let backend = Arc::new(CountingBackend::new(0));
    registry.sdk().set_backend(backend as Arc<dyn DataBackend>);
    let notifier = Arc::new(RecordingNotifier {
        changes: Mutex::new(Vec::new()),
    });
    registry.sdk().set_sync_notifier(Arc::clone(&notifier) as Arc<dyn SyncNotifier>);

    let create = SdkRequest::new("app.alcove.journal", SdkAction::Create, "entry")
        .with_payload(serde_json::json!({ "title": "first" }));
    assert!(registry.sdk().send(&create).success);

    let read = SdkRequest::new("app.alcove.journal", SdkAction::Read, "entry");
    assert!(registry.sdk().send(&read).success);

    // Only the mutation produced a notification
    let changes = notifier.changes.lock().unwrap();
    assert_eq!(
        changes.as_slice(),
        [("app.alcove.journal".to_string(), "entry".to_string())]
    );
}

/// Denies everything and counts how often it was consulted
struct DenyingPrompt {
    asked: Mutex<u32>,
}

impl PermissionPrompt for DenyingPrompt {
    fn request(&self, _plugin_name: &str, _capability: &str, _description: &str) -> bool {
        *self.asked.lock().unwrap() += 1;
        false
    }
}

#[test]
fn denied_grants_persist_and_are_not_reprompted() {
    let root = TempDir::new().unwrap();
    write_journal_unit(&root.path().join("plugins"));

    // data-storage is tier-1 and never prompts; declare a non-tier
    // capability to exercise the prompt path.
    let unit = root.path().join("plugins/journal/plugin.toml");
    let manifest = std::fs::read_to_string(&unit)
        .unwrap()
        .replace(r#"capabilities = ["data-storage"]"#, r#"capabilities = ["network"]"#);
    std::fs::write(&unit, manifest).unwrap();

    let prompt = Arc::new(DenyingPrompt {
        asked: Mutex::new(0),
    });
    let mut registry = registry_in(&root, Arc::clone(&prompt) as Arc<dyn PermissionPrompt>);
    registry.discover();
    registry.initialize();

    assert_eq!(*prompt.asked.lock().unwrap(), 1);
    let state = registry.grant_state("app.alcove.journal");
    assert!(state.denied.contains("network"));

    // A second registry over the same state dir sees the persisted denial
    // and never prompts again
    drop(registry);
    let mut registry = registry_in(&root, Arc::clone(&prompt) as Arc<dyn PermissionPrompt>);
    registry.discover();
    registry.initialize();
    assert_eq!(*prompt.asked.lock().unwrap(), 1);
    assert!(
        registry
            .grant_state("app.alcove.journal")
            .denied
            .contains("network")
    );
}

#[tokio::test]
async fn async_reinitialize_rebuilds_from_disk() {
    let root = TempDir::new().unwrap();
    write_journal_unit(&root.path().join("plugins"));
    let mut registry = registry_in(&root, Arc::new(AllowAllPrompt));

    registry.discover();
    registry.initialize();
    registry.activate_by_policy().unwrap();
    assert_eq!(registry.active_ids(), ["app.alcove.journal"]);

    let cancel = tokio_util::sync::CancellationToken::new();
    let active = registry.reinitialize_async(cancel).await.unwrap();
    assert_eq!(active, ["app.alcove.journal"]);
    assert_eq!(registry.navigation().len(), 1);
}

#[test]
fn hot_load_from_directory_leaves_others_untouched() {
    let root = TempDir::new().unwrap();
    write_journal_unit(&root.path().join("plugins"));
    let mut registry = registry_in(&root, Arc::new(AllowAllPrompt));
    registry.discover();
    registry.initialize();
    registry.activate_by_policy().unwrap();

    // A second unit appears in a directory outside the scan roots
    let extra = root.path().join("extra");
    let unit = extra.join("scratch");
    std::fs::create_dir_all(&unit).unwrap();
    std::fs::write(unit.join("scratch.wasm"), EMPTY_WASM).unwrap();
    std::fs::write(
        unit.join("plugin.toml"),
        r#"
[plugin]
id = "app.alcove.scratch"
name = "Scratch"
version = "0.1.0"
"#,
    )
    .unwrap();

    let loaded = registry.load_from_directory(&extra).unwrap();
    assert_eq!(loaded, ["app.alcove.scratch"]);
    assert_eq!(
        registry.state_of("app.alcove.scratch"),
        Some(PluginState::Active)
    );
    assert_eq!(
        registry.state_of("app.alcove.journal"),
        Some(PluginState::Active)
    );

    registry.unload("app.alcove.scratch").unwrap();
    assert_eq!(registry.state_of("app.alcove.scratch"), None);
    assert_eq!(
        registry.state_of("app.alcove.journal"),
        Some(PluginState::Active)
    );
}
