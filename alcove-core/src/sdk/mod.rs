//! SDK bridge - the concurrency-safe path from plugin requests to the data backend
//!
//! - [`SdkHost`]: serializes requests, invokes the backend's single generic
//!   entry point, and enforces workspace-switch mutual exclusion
//! - [`DataBackend`]: the backend entry point the host shell wires in
//! - [`SyncNotifier`]: outbound-sync collaborator notified after mutations

mod host;

pub use host::{DataBackend, SdkEvent, SdkHost, SdkHostError, SyncNotifier, WorkspaceSwitchGuard};
