//! PluginContext - a plugin's window into host services
//!
//! One context exists per plugin, assembled by the host's façade factory at
//! initialize time. The context is the complete surface a plugin can reach:
//! data operations, namespaced settings, logging, navigation, dialogs, and
//! whatever optional services the host application wires in.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::PluginError;
use crate::sdk::{DataChannel, SdkRequest, SdkResponse};

/// Host-implemented settings access, namespaced per plugin.
///
/// Keys are stored as `plugin.<id>.<key>` in a single shared document;
/// the namespace prefix is the only isolation between plugins.
pub trait SettingsHandle: Send + Sync {
    /// Read a setting, `None` if unset
    fn get(&self, key: &str) -> Option<String>;
    /// Write a setting (persisted with debounce)
    fn set(&self, key: &str, value: &str);
    /// Remove a setting
    fn remove(&self, key: &str);
}

/// Host-implemented navigation access
pub trait NavigationHandle: Send + Sync {
    /// Return to the previously active tab, if one is remembered
    fn navigate_back(&self);
    /// Navigate to an item owned by another plugin. The host marshals the
    /// actual UI mutation to its UI-owning thread.
    fn navigate_to_item(&self, plugin_id: &str, entity_id: Option<&str>);
}

/// Host-implemented directory of capability-typed services.
///
/// A plugin publishes service instances under their capability type and
/// discovers what other plugins (or the host shell) have published. The
/// interface is type-erased so it can cross the plugin boundary; the
/// typed [`PluginContext::provide_capability`] family wraps it.
pub trait CapabilityHub: Send + Sync {
    /// Publish a provider under a capability type. Idempotent per instance.
    fn provide(&self, type_id: TypeId, instance: Arc<dyn Any + Send + Sync>);
    /// Withdraw a previously published provider. Idempotent.
    fn retract(&self, type_id: TypeId, instance: &Arc<dyn Any + Send + Sync>);
    /// Snapshot of the current providers for a capability type,
    /// in registration order
    fn providers(&self, type_id: TypeId) -> Vec<Arc<dyn Any + Send + Sync>>;
}

/// Host-implemented dialog and file-picker access
pub trait DialogHandle: Send + Sync {
    /// Show a confirm dialog, returning the user's choice
    fn confirm(&self, title: &str, message: &str) -> bool;
    /// Show a file picker filtered to the given extensions
    fn pick_file(&self, filter: &str) -> Option<PathBuf>;
}

/// A plugin's interface to host capabilities
pub struct PluginContext {
    plugin_id: String,
    plugin_dir: PathBuf,
    /// Effective grant set: tier-1 plus granted, minus denied
    granted_capabilities: HashSet<String>,
    data: Option<Arc<dyn DataChannel>>,
    settings: Option<Arc<dyn SettingsHandle>>,
    navigation: Option<Arc<dyn NavigationHandle>>,
    dialogs: Option<Arc<dyn DialogHandle>>,
    broker: Option<Arc<dyn CapabilityHub>>,
    /// Optional higher-level services wired by the host application
    /// (info panel, toast, focus mode, connection registry, ...)
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl PluginContext {
    /// Create a bare context. Host services are attached by the factory
    /// through the builder methods.
    pub fn new(plugin_id: String, plugin_dir: PathBuf) -> Self {
        Self {
            plugin_id,
            plugin_dir,
            granted_capabilities: HashSet::new(),
            data: None,
            settings: None,
            navigation: None,
            dialogs: None,
            broker: None,
            services: HashMap::new(),
        }
    }

    /// Builder: set the effective capability grant set
    pub fn with_capabilities(mut self, capabilities: HashSet<String>) -> Self {
        self.granted_capabilities = capabilities;
        self
    }

    /// Builder: attach the data bridge
    pub fn with_data(mut self, data: Arc<dyn DataChannel>) -> Self {
        self.data = Some(data);
        self
    }

    /// Builder: attach namespaced settings
    pub fn with_settings(mut self, settings: Arc<dyn SettingsHandle>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Builder: attach the navigation adapter
    pub fn with_navigation(mut self, navigation: Arc<dyn NavigationHandle>) -> Self {
        self.navigation = Some(navigation);
        self
    }

    /// Builder: attach dialog access
    pub fn with_dialogs(mut self, dialogs: Arc<dyn DialogHandle>) -> Self {
        self.dialogs = Some(dialogs);
        self
    }

    /// Builder: attach the capability hub
    pub fn with_broker(mut self, broker: Arc<dyn CapabilityHub>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Get the plugin's id
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Get the plugin's directory (for storing data files)
    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    // ─── Capabilities ────────────────────────────────────────────────

    /// Whether a capability is in the effective grant set
    pub fn has_capability(&self, name: &str) -> bool {
        self.granted_capabilities.contains(name)
    }

    /// Error unless the capability is granted
    pub fn require_capability(&self, name: &str) -> Result<(), PluginError> {
        if self.has_capability(name) {
            Ok(())
        } else {
            Err(PluginError::CapabilityDenied(name.to_string()))
        }
    }

    /// The effective grant set handed over at load time
    pub fn granted_capabilities(&self) -> &HashSet<String> {
        &self.granted_capabilities
    }

    // ─── Data bridge ─────────────────────────────────────────────────

    /// Issue a backend request. Fails with `not_ready` if the bridge has
    /// not been attached yet.
    pub fn send(&self, request: &SdkRequest) -> SdkResponse {
        match &self.data {
            Some(data) => data.send(request),
            None => SdkResponse::not_ready("data bridge not attached"),
        }
    }

    // ─── Settings ────────────────────────────────────────────────────

    /// Read a plugin-namespaced setting
    pub fn setting_get(&self, key: &str) -> Option<String> {
        self.settings.as_ref()?.get(key)
    }

    /// Write a plugin-namespaced setting
    pub fn setting_set(&self, key: &str, value: &str) {
        if let Some(settings) = &self.settings {
            settings.set(key, value);
        }
    }

    /// Remove a plugin-namespaced setting
    pub fn setting_remove(&self, key: &str) {
        if let Some(settings) = &self.settings {
            settings.remove(key);
        }
    }

    // ─── Navigation ──────────────────────────────────────────────────

    /// Get the navigation adapter, if attached
    pub fn navigation(&self) -> Option<&dyn NavigationHandle> {
        self.navigation.as_deref()
    }

    /// Get dialog access, if attached
    pub fn dialogs(&self) -> Option<&dyn DialogHandle> {
        self.dialogs.as_deref()
    }

    // ─── Capability hub ──────────────────────────────────────────────

    /// Publish a service instance under its capability type so other
    /// plugins can discover it. No-op if no hub is attached.
    pub fn provide_capability<T: Any + Send + Sync>(&self, instance: Arc<T>) {
        if let Some(broker) = &self.broker {
            broker.provide(TypeId::of::<T>(), instance);
        }
    }

    /// Withdraw a previously published service instance
    pub fn retract_capability<T: Any + Send + Sync>(&self, instance: &Arc<T>) {
        if let Some(broker) = &self.broker {
            let erased: Arc<dyn Any + Send + Sync> = instance.clone();
            broker.retract(TypeId::of::<T>(), &erased);
        }
    }

    /// Every current provider of a capability type, across all plugins
    /// and the host shell. Empty if no hub is attached.
    pub fn capability_providers<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        match &self.broker {
            Some(broker) => broker
                .providers(TypeId::of::<T>())
                .into_iter()
                .filter_map(|p| p.downcast::<T>().ok())
                .collect(),
            None => Vec::new(),
        }
    }

    // ─── Services ────────────────────────────────────────────────────

    /// Register a named service on this context.
    ///
    /// For trait objects, store `Arc<Arc<dyn Trait>>` and retrieve with
    /// `T = Arc<dyn Trait>`.
    pub fn register_service<T: Any + Send + Sync>(&mut self, name: &str, service: Arc<T>) {
        self.services.insert(name.to_string(), service);
    }

    /// Register a service that is already type-erased
    pub fn register_service_erased(&mut self, name: &str, service: Arc<dyn Any + Send + Sync>) {
        self.services.insert(name.to_string(), service);
    }

    /// Retrieve a named service by downcast
    pub fn get_service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services
            .get(name)
            .cloned()
            .and_then(|s| s.downcast::<T>().ok())
    }

    // ─── Logging ─────────────────────────────────────────────────────

    /// Log an info message (automatically tagged with the plugin id)
    pub fn log_info(&self, message: &str) {
        tracing::info!(plugin = %self.plugin_id, "{}", message);
    }

    /// Log a warning message
    pub fn log_warn(&self, message: &str) {
        tracing::warn!(plugin = %self.plugin_id, "{}", message);
    }

    /// Log an error message
    pub fn log_error(&self, message: &str) {
        tracing::error!(plugin = %self.plugin_id, "{}", message);
    }

    /// Log a debug message
    pub fn log_debug(&self, message: &str) {
        tracing::debug!(plugin = %self.plugin_id, "{}", message);
    }
}
