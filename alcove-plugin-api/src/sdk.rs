//! SDK wire contract - the generic request/response bridge to the data backend
//!
//! Every data operation a plugin performs flows through one entry point as a
//! serialized [`SdkRequest`] and comes back as an [`SdkResponse`]. Expected
//! failure conditions are structured results carrying one of the codes in
//! [`error_codes`], never panics or transport errors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known error codes returned in [`SdkResponse::error_code`]
pub mod error_codes {
    /// Bridge lock timed out or the backend is not initialized
    pub const NOT_READY: &str = "not_ready";
    /// The backend returned no response or a garbled one
    pub const FFI_ERROR: &str = "ffi_error";
    /// Request or response payload failed to (de)serialize
    pub const JSON_ERROR: &str = "json_error";
    /// Mutation blocked by license entitlement (read-only mode)
    pub const LICENSE_READ_ONLY: &str = "license_read_only";
}

/// Domain operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdkAction {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Command,
    Count,
}

impl SdkAction {
    /// Whether this action mutates backend state
    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// A generic data operation routed to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkRequest {
    /// Id of the plugin issuing the request
    pub plugin_id: String,
    /// Operation kind
    pub action: SdkAction,
    /// Entity type the operation targets
    pub entity_type: String,
    /// Entity id for read/update/delete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Entity payload for create/update, command body for command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Extra operation parameters (query filters, command name, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
}

impl SdkRequest {
    /// Build a request with no payload or parameters
    pub fn new(plugin_id: impl Into<String>, action: SdkAction, entity_type: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            action,
            entity_type: entity_type.into(),
            entity_id: None,
            payload: None,
            parameters: HashMap::new(),
        }
    }

    /// Builder: set the entity id
    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// Builder: set the payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builder: add a parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Result of a backend operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkResponse {
    /// Whether the operation succeeded
    pub success: bool,
    /// Error code from [`error_codes`] or a backend-specific code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Result data; for mutations the full post-operation entity snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl SdkResponse {
    /// Successful response with data
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            error_code: None,
            error_message: None,
            data,
        }
    }

    /// Failed response with a code and message
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            data: None,
        }
    }

    /// Bridge-not-ready failure (lock timeout, backend missing)
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::error(error_codes::NOT_READY, message)
    }

    /// Whether this response is the distinguished license read-only block
    pub fn is_license_blocked(&self) -> bool {
        self.error_code.as_deref() == Some(error_codes::LICENSE_READ_ONLY)
    }
}

/// The plugin-facing handle for issuing backend requests.
///
/// Implemented by the host; plugins receive it through their context.
pub trait DataChannel: Send + Sync {
    /// Execute one backend operation. Expected failures come back as
    /// unsuccessful responses, never as panics.
    fn send(&self, request: &SdkRequest) -> SdkResponse;
}
