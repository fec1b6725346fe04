//! alcove-plugin-api - Plugin API for the alcove workspace
//!
//! This crate provides the traits and types needed to write plugins for
//! alcove. Native plugins are Rust dynamic libraries loaded in-process;
//! sandboxed plugins are wasm modules proxied through the same interface
//! on the host side.
//!
//! # Example
//!
//! ```ignore
//! use alcove_plugin_api::{Plugin, PluginContext, PluginError, PluginMetadata, export_plugin};
//!
//! #[derive(Default)]
//! pub struct NotesPlugin;
//!
//! impl Plugin for NotesPlugin {
//!     fn metadata(&self) -> PluginMetadata {
//!         PluginMetadata {
//!             id: "app.alcove.notes".to_string(),
//!             name: "Notes".to_string(),
//!             ..Default::default()
//!         }
//!     }
//!
//!     fn initialize(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError> {
//!         ctx.log_info("Notes plugin initialized");
//!         Ok(true)
//!     }
//! }
//!
//! export_plugin!(NotesPlugin);
//! ```

pub mod context;
pub mod error;
pub mod manifest;
pub mod sdk;
pub mod types;

pub use context::{CapabilityHub, DialogHandle, NavigationHandle, PluginContext, SettingsHandle};
pub use error::PluginError;
pub use manifest::PluginManifest;
pub use sdk::{DataChannel, SdkAction, SdkRequest, SdkResponse, error_codes};
pub use types::*;

/// Current plugin API version. Native plugins must match this exactly;
/// it is checked before the plugin instance is created.
pub const API_VERSION: u32 = 1;

/// The core plugin trait.
///
/// The registry drives every instance through the same lifecycle regardless
/// of how it was loaded: `initialize` (once, sequential across plugins),
/// then `activate`/`deactivate` as policy and user toggles dictate, and
/// finally `dispose` on unload or full reinitialize.
///
/// Capability accessors (`navigation_item`, `commands`, `data_metrics`)
/// have default empty implementations; plugins override the ones they
/// provide.
pub trait Plugin: Send + Sync {
    /// Return plugin metadata
    fn metadata(&self) -> PluginMetadata;

    /// Called once after the façade is attached. Returning `Ok(false)` or
    /// an error marks the plugin failed; it will never activate.
    fn initialize(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError>;

    /// Called when the plugin becomes active
    fn activate(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called when the plugin is deactivated
    fn deactivate(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called before the instance is dropped. Clean up resources here.
    fn dispose(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Sidebar entry this plugin contributes while active
    fn navigation_item(&self) -> Option<NavigationItem> {
        None
    }

    /// Commands this plugin contributes while active
    fn commands(&self) -> Vec<CommandDefinition> {
        Vec::new()
    }

    /// Storage metrics for the shell's usage view
    fn data_metrics(&self, _ctx: &PluginContext) -> Option<DataMetrics> {
        None
    }
}

/// Export a plugin type for dynamic loading.
///
/// Generates the C ABI entry points the host uses to create and destroy
/// plugin instances:
///
/// - `_alcove_plugin_create()`: creates a new plugin instance
/// - `_alcove_plugin_api_version()`: returns the API version
/// - `_alcove_plugin_destroy()`: destroys a plugin instance
#[macro_export]
macro_rules! export_plugin {
    ($plugin_type:ty) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _alcove_plugin_create() -> *mut dyn $crate::Plugin {
            let plugin: Box<dyn $crate::Plugin> = Box::new(<$plugin_type>::default());
            Box::into_raw(plugin)
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _alcove_plugin_api_version() -> u32 {
            $crate::API_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _alcove_plugin_destroy(ptr: *mut dyn $crate::Plugin) {
            if !ptr.is_null() {
                unsafe {
                    drop(Box::from_raw(ptr));
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_is_set() {
        assert_eq!(API_VERSION, 1);
    }

    #[test]
    fn plugin_trait_is_object_safe() {
        // This compiles only if Plugin is object-safe
        fn _takes_boxed_plugin(_: Box<dyn Plugin>) {}
    }

    #[test]
    fn default_capability_accessors_are_empty() {
        struct Bare;
        impl Plugin for Bare {
            fn metadata(&self) -> PluginMetadata {
                PluginMetadata::default()
            }
            fn initialize(&mut self, _ctx: &mut PluginContext) -> Result<bool, PluginError> {
                Ok(true)
            }
        }

        let plugin = Bare;
        assert!(plugin.navigation_item().is_none());
        assert!(plugin.commands().is_empty());
    }
}
