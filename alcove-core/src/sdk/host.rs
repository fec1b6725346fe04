//! SdkHost - concurrency-safe bridge to the shared data backend
//!
//! Normal request traffic takes the read side of one read/write lock; a
//! workspace switch takes the write side, draining in-flight requests and
//! getting exclusive access for backend teardown/rebuild. Requests bound
//! their wait at 5 seconds and fail fast with `not_ready` instead of
//! queuing, so a switch can never hang the interactive path.

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use alcove_plugin_api::sdk::{SdkRequest, SdkResponse, error_codes};

/// Bound on read-side lock acquisition before a request fails fast
const READ_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// The backend's single generic entry point.
///
/// Takes a serialized [`SdkRequest`] and returns a serialized
/// [`SdkResponse`], or `None` when the backend produced nothing at all.
pub trait DataBackend: Send + Sync {
    fn invoke(&self, request_json: &str) -> Option<String>;
}

/// Outbound-sync collaborator, notified after each successful mutation
pub trait SyncNotifier: Send + Sync {
    /// Called with the post-operation entity snapshot when available,
    /// the pre-operation request payload otherwise.
    fn entity_changed(
        &self,
        plugin_id: &str,
        entity_type: &str,
        entity_id: Option<&str>,
        snapshot: &serde_json::Value,
    );
}

/// Events the bridge raises for the UI
#[derive(Debug, Clone)]
pub enum SdkEvent {
    /// A mutation was blocked by license entitlement (read-only mode).
    /// Raised here once so call sites don't each special-case the code.
    LicenseReadOnly {
        plugin_id: String,
        message: String,
    },
}

/// Errors from host-level bridge operations.
///
/// Per-request failures are never errors; they come back as structured
/// [`SdkResponse`] values.
#[derive(Error, Debug)]
pub enum SdkHostError {
    #[error("A workspace switch is already in progress")]
    SwitchInProgress,
}

/// The bridge between plugin requests and the shared data backend
pub struct SdkHost {
    backend: RwLock<Option<Arc<dyn DataBackend>>>,
    /// Set for the duration of a workspace switch
    switching: AtomicBool,
    sync_notifier: Mutex<Option<Arc<dyn SyncNotifier>>>,
    /// Token outbound-sync work observes; cancelled when a switch begins
    sync_cancel: Mutex<CancellationToken>,
    events: broadcast::Sender<SdkEvent>,
    read_timeout: Duration,
}

impl SdkHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            backend: RwLock::new(None),
            switching: AtomicBool::new(false),
            sync_notifier: Mutex::new(None),
            sync_cancel: Mutex::new(CancellationToken::new()),
            events,
            read_timeout: READ_LOCK_TIMEOUT,
        }
    }

    /// Create a host with a shorter read-lock bound (tests)
    pub fn with_read_timeout(timeout: Duration) -> Self {
        Self {
            read_timeout: timeout,
            ..Self::new()
        }
    }

    /// Install the backend outside of a switch (startup path)
    pub fn set_backend(&self, backend: Arc<dyn DataBackend>) {
        *self.backend.write() = Some(backend);
    }

    /// Attach the outbound-sync collaborator
    pub fn set_sync_notifier(&self, notifier: Arc<dyn SyncNotifier>) {
        *self.sync_notifier.lock() = Some(notifier);
    }

    /// Token for outbound-sync work; cancelled when a workspace switch begins
    pub fn sync_cancellation(&self) -> CancellationToken {
        self.sync_cancel.lock().child_token()
    }

    /// Subscribe to bridge events
    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.events.subscribe()
    }

    /// Whether a workspace switch is currently in progress
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::SeqCst)
    }

    /// Execute one backend operation.
    ///
    /// Expected failures come back as unsuccessful responses with one of
    /// the codes in [`error_codes`]; this method never panics on backend
    /// misbehavior.
    pub fn send(&self, request: &SdkRequest) -> SdkResponse {
        let guard = match self.backend.try_read_for(self.read_timeout) {
            Some(guard) => guard,
            None => {
                warn!(
                    plugin = %request.plugin_id,
                    "Bridge read lock timed out; workspace switch in progress"
                );
                return SdkResponse::not_ready("workspace switch in progress");
            }
        };

        let Some(backend) = guard.as_ref() else {
            return SdkResponse::not_ready("backend not initialized");
        };

        let request_json = match serde_json::to_string(request) {
            Ok(json) => json,
            Err(e) => {
                return SdkResponse::error(
                    error_codes::JSON_ERROR,
                    format!("failed to serialize request: {e}"),
                );
            }
        };

        let Some(response_json) = backend.invoke(&request_json) else {
            return SdkResponse::error(error_codes::FFI_ERROR, "backend returned no response");
        };

        let response: SdkResponse = match serde_json::from_str(&response_json) {
            Ok(response) => response,
            Err(e) => {
                return SdkResponse::error(
                    error_codes::FFI_ERROR,
                    format!("garbled backend response: {e}"),
                );
            }
        };

        if response.success && request.action.is_mutation() {
            self.notify_sync(request, &response);
        }

        if response.is_license_blocked() {
            let _ = self.events.send(SdkEvent::LicenseReadOnly {
                plugin_id: request.plugin_id.clone(),
                message: response
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "read-only mode".to_string()),
            });
        }

        response
    }

    /// Begin an exclusive workspace switch.
    ///
    /// Cancels outstanding outbound-sync work, sets the switching flag,
    /// then blocks acquiring the write lock until in-flight requests
    /// drain. The returned guard gives exclusive access to the backend
    /// slot; dropping it ends the switch.
    pub fn begin_workspace_switch(&self) -> Result<WorkspaceSwitchGuard<'_>, SdkHostError> {
        if self
            .switching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SdkHostError::SwitchInProgress);
        }

        {
            let mut cancel = self.sync_cancel.lock();
            cancel.cancel();
            *cancel = CancellationToken::new();
        }

        debug!("Workspace switch: waiting for in-flight requests to drain");
        let guard = self.backend.write();

        Ok(WorkspaceSwitchGuard { host: self, guard })
    }

    fn notify_sync(&self, request: &SdkRequest, response: &SdkResponse) {
        let Some(notifier) = self.sync_notifier.lock().clone() else {
            return;
        };

        // Prefer the post-operation snapshot: the backend may have filled
        // in defaults and timestamps the request payload lacks.
        let snapshot = response
            .data
            .as_ref()
            .or(request.payload.as_ref())
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        notifier.entity_changed(
            &request.plugin_id,
            &request.entity_type,
            request.entity_id.as_deref(),
            &snapshot,
        );
    }
}

impl Default for SdkHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to the backend slot for the duration of a workspace
/// switch. Dropping the guard releases the lock and clears the switching
/// flag.
pub struct WorkspaceSwitchGuard<'a> {
    host: &'a SdkHost,
    guard: RwLockWriteGuard<'a, Option<Arc<dyn DataBackend>>>,
}

impl WorkspaceSwitchGuard<'_> {
    /// Tear down the current backend, returning it
    pub fn take_backend(&mut self) -> Option<Arc<dyn DataBackend>> {
        self.guard.take()
    }

    /// Install the rebuilt backend
    pub fn set_backend(&mut self, backend: Arc<dyn DataBackend>) {
        *self.guard = Some(backend);
    }
}

impl Drop for WorkspaceSwitchGuard<'_> {
    fn drop(&mut self) {
        self.host.switching.store(false, Ordering::SeqCst);
        debug!("Workspace switch complete");
    }
}
