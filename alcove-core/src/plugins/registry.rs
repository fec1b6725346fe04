//! PluginRegistry - owns every plugin instance and drives its lifecycle
//!
//! The registry is the single owner of loaded plugins: at most one entry
//! per id, ever. It composes discovery, the two loaders, the grant engine,
//! the capability broker, and the per-plugin façade, and mirrors active
//! plugins into the navigation collection and command registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use alcove_plugin_api::{
    DataMetrics, DialogHandle, PluginCategory, PluginContext, PluginMetadata, SdkAction,
    SdkRequest,
};

use super::broker::CapabilityBroker;
use super::commands::CommandRegistry;
use super::discovery::{self, DiscoveredUnit, SandboxUnit};
use super::error::PluginHostError;
use super::facade::{BrokerChannel, FacadeFactory};
use super::handle::{PluginHandle, PluginKind, PluginState};
use super::native::NativeLoader;
use super::navigation::{NavigationCollection, UiDispatcher};
use super::permissions::{GrantEngine, GrantState, PermissionPrompt};
use super::policy::PluginPolicy;
use super::sandbox::SandboxLoader;
use crate::sdk::SdkHost;
use crate::settings::SettingsStore;

/// Where the registry looks for plugin units and keeps its state files
pub struct RegistryConfig {
    /// Read-only directory of units shipped with the application
    pub bundled_dir: Option<PathBuf>,
    /// User-writable plugin directory
    pub user_dir: PathBuf,
    /// Directory for policy, grants, and settings documents
    pub state_dir: PathBuf,
}

impl RegistryConfig {
    pub fn policy_path(&self) -> PathBuf {
        self.state_dir.join("policy.toml")
    }

    pub fn grants_path(&self) -> PathBuf {
        self.state_dir.join("grants.toml")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.state_dir.join("settings.toml")
    }
}

/// Lifecycle notifications for the shell
#[derive(Debug, Clone)]
pub enum PluginEvent {
    StateChanged {
        plugin_id: String,
        state: PluginState,
    },
    Unloaded {
        plugin_id: String,
    },
}

/// Broker record for one active plugin; cross-plugin queries enumerate
/// these instead of touching plugin instances.
#[derive(Debug)]
pub struct ActivePluginInfo {
    pub id: String,
    pub name: String,
    pub category: PluginCategory,
}

/// Read-only view of a loaded plugin
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub kind: PluginKind,
    pub state: PluginState,
}

struct LoadedPlugin {
    handle: Box<dyn PluginHandle>,
    context: PluginContext,
    state: PluginState,
    dir: PathBuf,
    broker_entry: Option<Arc<ActivePluginInfo>>,
    /// The plugin's capability hub handle, set at initialize; purged when
    /// the plugin deactivates or unloads
    hub: Option<Arc<BrokerChannel>>,
}

pub struct PluginRegistry {
    config: RegistryConfig,
    /// Sole owner of plugin instances, at most one entry per id
    plugins: HashMap<String, LoadedPlugin>,
    /// Navigation item id -> owning plugin id, active plugins only
    nav_index: HashMap<String, String>,
    native_loader: Arc<NativeLoader>,
    sandbox_loader: Arc<SandboxLoader>,
    sdk: Arc<SdkHost>,
    broker: Arc<CapabilityBroker>,
    grants: GrantEngine,
    navigation: Arc<NavigationCollection>,
    commands: Arc<CommandRegistry>,
    dispatcher: Arc<dyn UiDispatcher>,
    facade: FacadeFactory,
    events: broadcast::Sender<PluginEvent>,
}

impl PluginRegistry {
    pub fn new(
        config: RegistryConfig,
        prompt: Arc<dyn PermissionPrompt>,
        dispatcher: Arc<dyn UiDispatcher>,
    ) -> Result<Self, PluginHostError> {
        let sdk = Arc::new(SdkHost::new());
        let settings = SettingsStore::load(&config.settings_path())
            .map_err(|e| PluginHostError::Store(e.to_string()))?;
        let grants = GrantEngine::load(&config.grants_path(), prompt)?;
        let navigation = Arc::new(NavigationCollection::new());
        let broker = Arc::new(CapabilityBroker::new());
        let facade = FacadeFactory::new(
            Arc::clone(&sdk),
            settings,
            Arc::clone(&navigation),
            Arc::clone(&broker),
            Arc::clone(&dispatcher),
        );
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            config,
            plugins: HashMap::new(),
            nav_index: HashMap::new(),
            native_loader: Arc::new(NativeLoader::new()),
            sandbox_loader: Arc::new(SandboxLoader::new()?),
            sdk,
            broker,
            grants,
            navigation,
            commands: Arc::new(CommandRegistry::new()),
            dispatcher,
            facade,
            events,
        })
    }

    // ─── Shell surface ───────────────────────────────────────────────

    pub fn sdk(&self) -> &Arc<SdkHost> {
        &self.sdk
    }

    pub fn broker(&self) -> &Arc<CapabilityBroker> {
        &self.broker
    }

    pub fn navigation(&self) -> &Arc<NavigationCollection> {
        &self.navigation
    }

    pub fn command_registry(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    pub fn set_dialogs(&mut self, dialogs: Arc<dyn DialogHandle>) {
        self.facade.set_dialogs(dialogs);
    }

    /// Expose a host service to every plugin context built from now on
    pub fn register_shell_service<T: std::any::Any + Send + Sync>(
        &mut self,
        name: &str,
        service: Arc<T>,
    ) {
        self.facade.register_service(name, service);
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<_> = self
            .plugins
            .values()
            .map(|p| {
                let metadata = p.handle.metadata();
                PluginInfo {
                    id: metadata.id.clone(),
                    name: metadata.name.clone(),
                    version: metadata.version.clone(),
                    kind: p.handle.kind(),
                    state: p.state.clone(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .plugins
            .iter()
            .filter(|(_, p)| p.state == PluginState::Active)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn state_of(&self, id: &str) -> Option<PluginState> {
        self.plugins.get(id).map(|p| p.state.clone())
    }

    /// Plugin owning a navigation item, active plugins only
    pub fn plugin_owning_nav(&self, nav_id: &str) -> Option<&str> {
        self.nav_index.get(nav_id).map(String::as_str)
    }

    pub fn grant_state(&self, id: &str) -> GrantState {
        self.grants.grant_state(id)
    }

    pub fn data_metrics(&self, id: &str) -> Option<DataMetrics> {
        let plugin = self.plugins.get(id)?;
        plugin.handle.data_metrics(&plugin.context)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// Scan the configured directories and instantiate every unit found.
    /// Units already loaded under the same id are skipped, so repeated
    /// discovery of the same directories is idempotent. Returns newly
    /// admitted plugin ids.
    pub fn discover(&mut self) -> Vec<String> {
        let units = discovery::scan(&self.scan_dirs());
        let loaded = instantiate_units(&self.native_loader, &self.sandbox_loader, units);
        self.admit(loaded)
    }

    /// Install a pre-built plugin instance (application built-ins and
    /// tests). Subject to the same lifecycle as discovered units.
    pub fn install(&mut self, handle: Box<dyn PluginHandle>) -> Result<String, PluginHostError> {
        let id = handle.metadata().id.clone();
        if id.is_empty() {
            return Err(PluginHostError::Manifest("plugin id is empty".to_string()));
        }
        if self.plugins.contains_key(&id) {
            return Err(PluginHostError::DuplicateId { id });
        }
        let dir = self.config.user_dir.join(&id);
        let context = PluginContext::new(id.clone(), dir.clone());
        self.plugins.insert(
            id.clone(),
            LoadedPlugin {
                handle,
                context,
                state: PluginState::Discovered,
                dir,
                broker_entry: None,
                hub: None,
            },
        );
        let _ = self.events.send(PluginEvent::StateChanged {
            plugin_id: id.clone(),
            state: PluginState::Discovered,
        });
        Ok(id)
    }

    /// Initialize every discovered plugin, strictly sequentially.
    /// Returns the number of plugins that reached `Initialized`.
    pub fn initialize(&mut self) -> usize {
        self.initialize_with_cancel(None)
    }

    fn initialize_with_cancel(&mut self, cancel: Option<&CancellationToken>) -> usize {
        let mut ids: Vec<String> = self
            .plugins
            .iter()
            .filter(|(_, p)| p.state == PluginState::Discovered)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();

        let mut initialized = 0;
        for id in ids {
            if let Some(token) = cancel
                && token.is_cancelled()
            {
                tracing::info!("Plugin initialization cancelled");
                break;
            }

            self.set_state(&id, PluginState::Initializing);
            match self.initialize_one(&id) {
                Ok(true) => {
                    self.set_state(&id, PluginState::Initialized);
                    initialized += 1;
                }
                Ok(false) => {
                    tracing::warn!(plugin = %id, "Plugin declined to initialize");
                    self.purge_hub(&id);
                    self.set_state(
                        &id,
                        PluginState::Failed {
                            error: "initialize returned false".to_string(),
                        },
                    );
                }
                Err(e) => {
                    tracing::error!(plugin = %id, error = %e, "Plugin initialization failed");
                    self.purge_hub(&id);
                    self.set_state(
                        &id,
                        PluginState::Failed {
                            error: e.to_string(),
                        },
                    );
                }
            }
        }
        initialized
    }

    fn initialize_one(&mut self, id: &str) -> Result<bool, PluginHostError> {
        let (metadata, dir) = {
            let plugin = self
                .plugins
                .get(id)
                .ok_or_else(|| PluginHostError::NotFound { id: id.to_string() })?;
            (plugin.handle.metadata().clone(), plugin.dir.clone())
        };

        self.register_schemas(&metadata);
        let granted = self.grants.resolve(&metadata)?;
        let (mut context, hub) = self.facade.build(id, dir, granted);

        let plugin = self
            .plugins
            .get_mut(id)
            .ok_or_else(|| PluginHostError::NotFound { id: id.to_string() })?;
        plugin.hub = Some(hub);
        let accepted = plugin.handle.initialize(&mut context)?;
        plugin.context = context;
        Ok(accepted)
    }

    /// Make the backend aware of this plugin's entity schemas. A backend
    /// that is not attached yet will pick them up on the next initialize.
    fn register_schemas(&self, metadata: &PluginMetadata) {
        for schema in &metadata.schemas {
            let Ok(payload) = serde_json::to_value(schema) else {
                continue;
            };
            let request = SdkRequest::new(&metadata.id, SdkAction::Command, &schema.entity_type)
                .with_parameter("command", "register_schema")
                .with_payload(payload);
            let response = self.sdk.send(&request);
            if !response.success {
                tracing::debug!(
                    plugin = %metadata.id,
                    entity = %schema.entity_type,
                    code = ?response.error_code,
                    "Schema registration deferred"
                );
            }
        }
    }

    /// Activate every initialized plugin the persisted policy allows.
    /// Returns the ids that became active.
    pub fn activate_by_policy(&mut self) -> Result<Vec<String>, PluginHostError> {
        let policy = PluginPolicy::load(&self.config.policy_path())?;

        let mut ids: Vec<String> = self
            .plugins
            .iter()
            .filter(|(_, p)| p.state == PluginState::Initialized)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();

        let mut activated = Vec::new();
        for id in ids {
            let Some(plugin) = self.plugins.get(&id) else {
                continue;
            };
            if !policy.should_activate(plugin.handle.metadata()) {
                tracing::debug!(plugin = %id, "Activation withheld by policy");
                continue;
            }
            match self.activate(&id) {
                Ok(()) => activated.push(id),
                Err(e) => tracing::error!(plugin = %id, error = %e, "Activation failed"),
            }
        }
        Ok(activated)
    }

    /// Activate one plugin: run its hook, then publish its navigation
    /// item, commands, and broker record. No-op if already active.
    pub fn activate(&mut self, id: &str) -> Result<(), PluginHostError> {
        let hook_result = {
            let plugin = self
                .plugins
                .get_mut(id)
                .ok_or_else(|| PluginHostError::NotFound { id: id.to_string() })?;
            if plugin.state == PluginState::Active {
                return Ok(());
            }
            if !plugin.state.can_transition_to(&PluginState::Active) {
                return Err(PluginHostError::Module(format!(
                    "{id} cannot activate from state {:?}",
                    plugin.state
                )));
            }
            plugin.handle.activate(&mut plugin.context)
        };

        if let Err(e) = hook_result {
            self.set_state(
                id,
                PluginState::Failed {
                    error: e.to_string(),
                },
            );
            return Err(PluginHostError::Hook(e));
        }

        let (nav_item, command_defs, info) = {
            let plugin = self
                .plugins
                .get(id)
                .ok_or_else(|| PluginHostError::NotFound { id: id.to_string() })?;
            let metadata = plugin.handle.metadata();
            (
                plugin.handle.navigation_item(),
                plugin.handle.commands(),
                Arc::new(ActivePluginInfo {
                    id: metadata.id.clone(),
                    name: metadata.name.clone(),
                    category: metadata.category,
                }),
            )
        };

        self.broker.register(Arc::clone(&info));
        if let Some(plugin) = self.plugins.get_mut(id) {
            plugin.broker_entry = Some(info);
        }

        if let Some(item) = nav_item {
            self.nav_index.insert(item.id.clone(), id.to_string());
            let collection = Arc::clone(&self.navigation);
            let owner = id.to_string();
            self.dispatcher
                .dispatch(Box::new(move || collection.insert(&owner, item)));
        }

        if !command_defs.is_empty() {
            let registry = Arc::clone(&self.commands);
            let owner = id.to_string();
            self.dispatcher.dispatch(Box::new(move || {
                if let Err(existing) = registry.register(&owner, command_defs) {
                    tracing::warn!(
                        plugin = %owner,
                        conflicting_plugin = %existing,
                        "Command ids already taken, commands not registered"
                    );
                }
            }));
        }

        self.set_state(id, PluginState::Active);
        Ok(())
    }

    /// Deactivate one plugin, removing its navigation item, commands, and
    /// broker record. No-op if not active. Surfaces are removed even when
    /// the deactivate hook errors.
    pub fn deactivate(&mut self, id: &str) -> Result<(), PluginHostError> {
        let hook_result = {
            let plugin = self
                .plugins
                .get_mut(id)
                .ok_or_else(|| PluginHostError::NotFound { id: id.to_string() })?;
            if plugin.state != PluginState::Active {
                return Ok(());
            }
            plugin.handle.deactivate(&mut plugin.context)
        };

        self.remove_surfaces(id);

        match hook_result {
            Ok(()) => {
                self.set_state(id, PluginState::Deactivated);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(plugin = %id, error = %e, "Deactivate hook failed");
                self.set_state(
                    id,
                    PluginState::Failed {
                        error: e.to_string(),
                    },
                );
                Err(PluginHostError::Hook(e))
            }
        }
    }

    fn remove_surfaces(&mut self, id: &str) {
        self.nav_index.retain(|_, owner| owner != id);

        let collection = Arc::clone(&self.navigation);
        let commands = Arc::clone(&self.commands);
        let owner = id.to_string();
        self.dispatcher.dispatch(Box::new(move || {
            collection.remove(&owner);
            commands.unregister(&owner);
        }));

        let entry = self.plugins.get_mut(id).and_then(|p| p.broker_entry.take());
        if let Some(info) = entry {
            self.broker.unregister(&info);
        }
        self.purge_hub(id);
    }

    /// Withdraw every capability the plugin registered through its hub
    /// handle, leaving nothing stale behind
    fn purge_hub(&self, id: &str) {
        if let Some(hub) = self.plugins.get(id).and_then(|p| p.hub.as_ref()) {
            hub.purge();
        }
    }

    // ─── Policy-driven enable/disable ────────────────────────────────

    /// Persist an enable decision and activate if currently possible
    pub fn enable(&mut self, id: &str) -> Result<(), PluginHostError> {
        let policy_path = self.config.policy_path();
        let mut policy = PluginPolicy::load(&policy_path)?;
        policy.enable(id);
        policy.save(&policy_path)?;

        if matches!(
            self.state_of(id),
            Some(PluginState::Initialized | PluginState::Deactivated)
        ) {
            self.activate(id)?;
        }
        Ok(())
    }

    /// Persist a disable decision and deactivate if currently active.
    /// Hard-locked and non-disableable plugins reject this.
    pub fn disable(&mut self, id: &str) -> Result<(), PluginHostError> {
        if let Some(plugin) = self.plugins.get(id) {
            let metadata = plugin.handle.metadata();
            if metadata.hard_locked || !metadata.can_disable {
                return Err(PluginHostError::HardLocked { id: id.to_string() });
            }
        }

        let policy_path = self.config.policy_path();
        let mut policy = PluginPolicy::load(&policy_path)?;
        policy.disable(id);
        policy.save(&policy_path)?;

        if self.state_of(id) == Some(PluginState::Active) {
            self.deactivate(id)?;
        }
        Ok(())
    }

    /// Flip the persisted policy for a plugin; returns the new enabled state
    pub fn toggle(&mut self, id: &str) -> Result<bool, PluginHostError> {
        let policy = PluginPolicy::load(&self.config.policy_path())?;
        if policy.is_enabled(id) {
            self.disable(id)?;
            Ok(false)
        } else {
            self.enable(id)?;
            Ok(true)
        }
    }

    // ─── Hot load / unload ───────────────────────────────────────────

    /// Load units from one directory without disturbing loaded plugins.
    /// Newly found units go through the full initialize/activate path.
    pub fn load_from_directory(&mut self, path: &Path) -> Result<Vec<String>, PluginHostError> {
        let units = discovery::scan(std::slice::from_ref(&path.to_path_buf()));
        let new_ids = self.admit(instantiate_units(
            &self.native_loader,
            &self.sandbox_loader,
            units,
        ));
        self.initialize_with_cancel(None);

        let policy = PluginPolicy::load(&self.config.policy_path())?;
        for id in &new_ids {
            if self.state_of(id) != Some(PluginState::Initialized) {
                continue;
            }
            let should = self
                .plugins
                .get(id)
                .is_some_and(|p| policy.should_activate(p.handle.metadata()));
            if should && let Err(e) = self.activate(id) {
                tracing::error!(plugin = %id, error = %e, "Activation failed");
            }
        }
        Ok(new_ids)
    }

    /// Deactivate, dispose, and drop one plugin
    pub fn unload(&mut self, id: &str) -> Result<(), PluginHostError> {
        if self.state_of(id) == Some(PluginState::Active) {
            let _ = self.deactivate(id);
        }

        let Some(mut plugin) = self.plugins.remove(id) else {
            return Err(PluginHostError::NotFound { id: id.to_string() });
        };
        if let Some(hub) = &plugin.hub {
            hub.purge();
        }
        if let Err(e) = plugin.handle.dispose() {
            tracing::warn!(plugin = %id, error = %e, "Dispose returned error");
        }
        let _ = self.events.send(PluginEvent::Unloaded {
            plugin_id: id.to_string(),
        });
        Ok(())
    }

    // ─── Reinitialize ────────────────────────────────────────────────

    /// Tear everything down and run the full discover/initialize/activate
    /// sequence again. Returns the active plugin ids.
    pub fn reinitialize(&mut self) -> Result<Vec<String>, PluginHostError> {
        self.teardown();
        self.discover();
        self.initialize();
        self.activate_by_policy()
    }

    /// Reinitialize with the blocking rescan moved off the caller's
    /// thread. Cancellation is honored between plugin initializations;
    /// a cancelled run leaves plugins initialized but not activated.
    pub async fn reinitialize_async(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<Vec<String>, PluginHostError> {
        self.teardown();

        let dirs = self.scan_dirs();
        let native = Arc::clone(&self.native_loader);
        let sandbox = Arc::clone(&self.sandbox_loader);
        let loaded = tokio::task::spawn_blocking(move || {
            instantiate_units(&native, &sandbox, discovery::scan(&dirs))
        })
        .await
        .map_err(|e| PluginHostError::Module(format!("reload worker failed: {e}")))?;

        self.admit(loaded);
        self.initialize_with_cancel(Some(&cancel));
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }
        self.activate_by_policy()
    }

    fn teardown(&mut self) {
        let ids: Vec<String> = self.plugins.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.unload(&id) {
                tracing::warn!(plugin = %id, error = %e, "Unload during teardown failed");
            }
        }
        self.nav_index.clear();
    }

    // ─── Internals ───────────────────────────────────────────────────

    fn scan_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(bundled) = &self.config.bundled_dir {
            dirs.push(bundled.clone());
        }
        dirs.push(self.config.user_dir.clone());
        dirs
    }

    fn admit(&mut self, loaded: Vec<(PathBuf, Box<dyn PluginHandle>)>) -> Vec<String> {
        let mut admitted = Vec::new();
        for (dir, handle) in loaded {
            let id = handle.metadata().id.clone();
            if id.is_empty() {
                tracing::warn!(dir = %dir.display(), "Unit has no plugin id, skipping");
                continue;
            }
            if self.plugins.contains_key(&id) {
                tracing::debug!(plugin = %id, "Already loaded, skipping");
                continue;
            }
            let context = PluginContext::new(id.clone(), dir.clone());
            self.plugins.insert(
                id.clone(),
                LoadedPlugin {
                    handle,
                    context,
                    state: PluginState::Discovered,
                    dir,
                    broker_entry: None,
                    hub: None,
                },
            );
            let _ = self.events.send(PluginEvent::StateChanged {
                plugin_id: id.clone(),
                state: PluginState::Discovered,
            });
            admitted.push(id);
        }
        admitted.sort();
        admitted
    }

    fn set_state(&mut self, id: &str, state: PluginState) {
        let Some(plugin) = self.plugins.get_mut(id) else {
            return;
        };
        if !plugin.state.can_transition_to(&state) {
            tracing::warn!(
                plugin = %id,
                from = ?plugin.state,
                to = ?state,
                "Rejected invalid state transition"
            );
            return;
        }
        plugin.state = state.clone();
        let _ = self.events.send(PluginEvent::StateChanged {
            plugin_id: id.to_string(),
            state,
        });
    }
}

/// Instantiate discovered units through the matching loader. Native
/// modules load one by one; sandboxed units go through the batch path.
/// Per-unit failures are logged and skipped.
fn instantiate_units(
    native: &NativeLoader,
    sandbox: &SandboxLoader,
    units: Vec<DiscoveredUnit>,
) -> Vec<(PathBuf, Box<dyn PluginHandle>)> {
    let mut loaded: Vec<(PathBuf, Box<dyn PluginHandle>)> = Vec::new();
    let mut batch: Vec<SandboxUnit> = Vec::new();

    for unit in units {
        match unit {
            DiscoveredUnit::Native { path } => match native.load(&path) {
                Ok(plugin) => {
                    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
                    loaded.push((dir, Box::new(plugin)));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping native module");
                }
            },
            DiscoveredUnit::Sandboxed(unit) => batch.push(unit),
        }
    }

    let dirs: Vec<PathBuf> = batch.iter().map(|u| u.dir.clone()).collect();
    for (result, dir) in sandbox.load_batch(&batch).into_iter().zip(dirs) {
        match result {
            Ok(plugin) => loaded.push((dir, Box::new(plugin))),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping sandboxed unit");
            }
        }
    }

    loaded
}
