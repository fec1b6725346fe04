//! Uniform plugin interface and lifecycle state
//!
//! Native and sandboxed plugins are both driven through [`PluginHandle`];
//! the registry and broker never branch on how an instance was loaded.

use alcove_plugin_api::{
    CommandDefinition, DataMetrics, NavigationItem, PluginContext, PluginError, PluginMetadata,
};

/// How a plugin was loaded. Diagnostics only; dispatch goes through
/// [`PluginHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Native,
    Sandboxed,
}

/// Lifecycle state of a loaded plugin instance
#[derive(Debug, Clone, PartialEq)]
pub enum PluginState {
    Discovered,
    Initializing,
    Initialized,
    Active,
    Deactivated,
    /// Terminal; reachable from any non-terminal state on error
    Failed { error: String },
}

impl PluginState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    /// In particular, nothing reaches `Active` without passing through
    /// `Initialized` first.
    pub fn can_transition_to(&self, next: &PluginState) -> bool {
        use PluginState::*;
        match (self, next) {
            (Failed { .. }, _) => false,
            (_, Failed { .. }) => true,
            (Discovered, Initializing) => true,
            (Initializing, Initialized) => true,
            (Initialized, Active) => true,
            (Active, Deactivated) => true,
            (Deactivated, Active) => true,
            _ => false,
        }
    }
}

/// The closed interface set the registry drives every instance through
pub trait PluginHandle: Send {
    fn metadata(&self) -> &PluginMetadata;

    fn kind(&self) -> PluginKind;

    /// Run the plugin's initialize hook. `Ok(false)` means the plugin
    /// declined to initialize; it is marked failed and never activates.
    fn initialize(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError>;

    fn activate(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError>;

    fn deactivate(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError>;

    /// Release plugin resources. Called once before the instance is
    /// dropped; implementations must tolerate repeat calls.
    fn dispose(&mut self) -> Result<(), PluginError>;

    fn navigation_item(&self) -> Option<NavigationItem> {
        None
    }

    fn commands(&self) -> Vec<CommandDefinition> {
        Vec::new()
    }

    fn data_metrics(&self, _ctx: &PluginContext) -> Option<DataMetrics> {
        None
    }
}
