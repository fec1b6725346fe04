//! Plugin host error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the plugin host
#[derive(Error, Debug)]
pub enum PluginHostError {
    /// Native module file not found in a plugin unit
    #[error("Plugin library not found in {dir}")]
    LibraryNotFound { dir: PathBuf },

    /// API version mismatch between host and plugin
    #[error("API version mismatch: host expects {expected}, plugin has {found}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    /// Failed to load a dynamic library
    #[error("Failed to load plugin library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// Plugin lifecycle hook failed
    #[error("Plugin hook failed: {0}")]
    Hook(#[from] alcove_plugin_api::PluginError),

    /// Unit manifest missing or invalid
    #[error("Invalid plugin manifest: {0}")]
    Manifest(String),

    /// Module bytes did not match the manifest checksum
    #[error("Checksum mismatch for module {path}")]
    ChecksumMismatch { path: PathBuf },

    /// Sandboxed module failed to parse, compile or instantiate
    #[error("Invalid plugin module: {0}")]
    Module(String),

    /// Plugin not found in the registry
    #[error("Plugin '{id}' not found")]
    NotFound { id: String },

    /// A unit declared an id that is already registered
    #[error("Plugin id '{id}' is already registered")]
    DuplicateId { id: String },

    /// Disable attempted on a hard-locked plugin
    #[error("Plugin '{id}' is hard-locked and cannot be disabled")]
    HardLocked { id: String },

    /// Grant or policy store error (parsing, saving)
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_not_found_display() {
        let err = PluginHostError::LibraryNotFound {
            dir: PathBuf::from("/some/path"),
        };
        assert!(err.to_string().contains("/some/path"));
    }

    #[test]
    fn api_version_mismatch_display() {
        let err = PluginHostError::ApiVersionMismatch {
            expected: 1,
            found: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains('1'));
        assert!(msg.contains('2'));
    }

    #[test]
    fn hard_locked_display() {
        let err = PluginHostError::HardLocked {
            id: "app.alcove.sys".to_string(),
        };
        assert!(err.to_string().contains("app.alcove.sys"));
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PluginHostError = io_err.into();
        assert!(matches!(err, PluginHostError::Io(_)));
    }
}
