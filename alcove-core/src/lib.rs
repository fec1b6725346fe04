//! alcove-core - plugin host and data bridge for the Alcove workspace
//!
//! The shell application builds a [`plugins::PluginRegistry`] at startup,
//! points it at the bundled and user plugin directories, and drives the
//! discover → initialize → activate sequence. Plugin data operations flow
//! through [`sdk::SdkHost`] to whichever backend is attached for the
//! current workspace.

pub mod plugins;
pub mod sdk;
pub mod settings;

pub use plugins::{PluginEvent, PluginRegistry, RegistryConfig};
pub use sdk::{DataBackend, SdkHost};
pub use settings::SettingsStore;
