//! Per-plugin host façade
//!
//! Each plugin gets its own [`PluginContext`] built here at initialize
//! time. The façade hands out only what the plugin's grants allow; the
//! data bridge, settings namespace, and navigation adapter are withheld
//! when the matching capability was denied.

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use alcove_plugin_api::{
    CapabilityHub, DataChannel, DialogHandle, PluginContext, SdkRequest, SdkResponse,
};

use super::broker::CapabilityBroker;
use super::navigation::{NavigationAdapter, NavigationCollection, UiDispatcher};
use crate::sdk::SdkHost;
use crate::settings::SettingsStore;

/// Data bridge handle scoped to one plugin.
///
/// Every request is stamped with the owning plugin's id before it crosses
/// the bridge; a plugin cannot issue requests on another plugin's behalf.
pub struct SdkChannel {
    host: Arc<SdkHost>,
    plugin_id: String,
}

impl SdkChannel {
    pub fn new(host: Arc<SdkHost>, plugin_id: impl Into<String>) -> Self {
        Self {
            host,
            plugin_id: plugin_id.into(),
        }
    }
}

impl DataChannel for SdkChannel {
    fn send(&self, request: &SdkRequest) -> SdkResponse {
        if request.plugin_id == self.plugin_id {
            return self.host.send(request);
        }
        let mut stamped = request.clone();
        stamped.plugin_id = self.plugin_id.clone();
        self.host.send(&stamped)
    }
}

/// Capability hub handle scoped to one plugin.
///
/// Registrations made through this handle are tracked so the registry can
/// purge them when the plugin deactivates or unloads; a dead plugin must
/// not leave stale providers behind.
pub struct BrokerChannel {
    broker: Arc<CapabilityBroker>,
    registered: Mutex<Vec<(TypeId, usize)>>,
}

impl BrokerChannel {
    fn new(broker: Arc<CapabilityBroker>) -> Self {
        Self {
            broker,
            registered: Mutex::new(Vec::new()),
        }
    }

    /// Withdraw everything this plugin registered
    pub fn purge(&self) {
        let entries: Vec<(TypeId, usize)> = std::mem::take(&mut *self.registered.lock());
        for (type_id, key) in entries {
            self.broker.unregister_erased(type_id, key);
        }
    }
}

impl CapabilityHub for BrokerChannel {
    fn provide(&self, type_id: TypeId, instance: Arc<dyn Any + Send + Sync>) {
        let key = self.broker.register_erased(type_id, instance);
        let mut registered = self.registered.lock();
        if !registered.contains(&(type_id, key)) {
            registered.push((type_id, key));
        }
    }

    fn retract(&self, type_id: TypeId, instance: &Arc<dyn Any + Send + Sync>) {
        let key = Arc::as_ptr(instance) as *const () as usize;
        self.broker.unregister_erased(type_id, key);
        self.registered
            .lock()
            .retain(|entry| *entry != (type_id, key));
    }

    fn providers(&self, type_id: TypeId) -> Vec<Arc<dyn Any + Send + Sync>> {
        self.broker.providers_erased(type_id)
    }
}

/// Builds per-plugin contexts from the host's shared collaborators
pub struct FacadeFactory {
    sdk: Arc<SdkHost>,
    settings: SettingsStore,
    navigation: Arc<NavigationCollection>,
    broker: Arc<CapabilityBroker>,
    dispatcher: Arc<dyn UiDispatcher>,
    dialogs: Option<Arc<dyn DialogHandle>>,
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl FacadeFactory {
    pub fn new(
        sdk: Arc<SdkHost>,
        settings: SettingsStore,
        navigation: Arc<NavigationCollection>,
        broker: Arc<CapabilityBroker>,
        dispatcher: Arc<dyn UiDispatcher>,
    ) -> Self {
        Self {
            sdk,
            settings,
            navigation,
            broker,
            dispatcher,
            dialogs: None,
            services: HashMap::new(),
        }
    }

    /// Dialog and file-picker implementation provided by the shell
    pub fn with_dialogs(mut self, dialogs: Arc<dyn DialogHandle>) -> Self {
        self.set_dialogs(dialogs);
        self
    }

    pub fn set_dialogs(&mut self, dialogs: Arc<dyn DialogHandle>) {
        self.dialogs = Some(dialogs);
    }

    /// Optional host service exposed to every plugin context under `name`
    pub fn register_service<T: Any + Send + Sync>(&mut self, name: &str, service: Arc<T>) {
        self.services.insert(name.to_string(), service);
    }

    /// Build the context for one plugin with its resolved grants.
    ///
    /// Also returns the plugin's hub handle; the registry keeps it so the
    /// plugin's capability registrations can be purged on deactivate.
    pub fn build(
        &self,
        plugin_id: &str,
        plugin_dir: PathBuf,
        granted: HashSet<String>,
    ) -> (PluginContext, Arc<BrokerChannel>) {
        let mut ctx = PluginContext::new(plugin_id.to_string(), plugin_dir);

        if granted.contains("data-storage") {
            ctx = ctx.with_data(Arc::new(SdkChannel::new(
                Arc::clone(&self.sdk),
                plugin_id,
            )));
        }

        if granted.contains("settings") {
            ctx = ctx.with_settings(Arc::new(self.settings.namespaced(plugin_id)));
        }

        if granted.contains("navigation") {
            ctx = ctx.with_navigation(Arc::new(NavigationAdapter::new(
                Arc::clone(&self.navigation),
                Arc::clone(&self.dispatcher),
            )));
        }

        if let Some(dialogs) = &self.dialogs {
            ctx = ctx.with_dialogs(Arc::clone(dialogs));
        }

        // The hub is part of every context; the broker is how plugins
        // find each other at all.
        let hub = Arc::new(BrokerChannel::new(Arc::clone(&self.broker)));
        ctx = ctx.with_broker(Arc::clone(&hub) as Arc<dyn CapabilityHub>);

        for (name, service) in &self.services {
            ctx.register_service_erased(name, Arc::clone(service));
        }

        (ctx.with_capabilities(granted), hub)
    }
}
