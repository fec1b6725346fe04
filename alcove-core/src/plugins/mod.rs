//! Plugin host: discovery, loading, lifecycle, permissions, and the
//! capability broker
//!
//! Two kinds of unit load into the same lifecycle: native modules
//! (shared libraries built against `alcove-plugin-api`) and sandboxed
//! modules (wasm bytecode plus a manifest). Both are driven through
//! [`PluginHandle`]; nothing downstream branches on the unit kind.

pub mod broker;
pub mod commands;
pub mod discovery;
pub mod error;
pub mod facade;
pub mod handle;
pub mod native;
pub mod navigation;
pub mod permissions;
pub mod policy;
pub mod registry;
pub mod sandbox;

pub use broker::CapabilityBroker;
pub use commands::{CommandRegistry, RegisteredCommand};
pub use error::PluginHostError;
pub use facade::{BrokerChannel, FacadeFactory, SdkChannel};
pub use handle::{PluginHandle, PluginKind, PluginState};
pub use native::{NativeLoader, NativePlugin};
pub use navigation::{
    InlineDispatcher, NavigationAdapter, NavigationChange, NavigationCollection, UiDispatcher,
};
pub use permissions::{AllowAllPrompt, GrantEngine, GrantState, PermissionPrompt};
pub use policy::{PluginPolicy, PolicyMode};
pub use registry::{
    ActivePluginInfo, PluginEvent, PluginInfo, PluginRegistry, RegistryConfig,
};
pub use sandbox::{SandboxLoader, SandboxedPlugin};
