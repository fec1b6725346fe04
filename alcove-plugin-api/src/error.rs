//! Error types for plugin authors

use thiserror::Error;

/// Errors that plugins can return
#[derive(Error, Debug)]
pub enum PluginError {
    /// Initialization failed with a message
    #[error("Initialization failed: {0}")]
    Init(String),

    /// Settings error
    #[error("Settings error: {0}")]
    Settings(String),

    /// A capability the plugin needs was not granted
    #[error("Capability '{0}' not granted")]
    CapabilityDenied(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

impl PluginError {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Create an initialization error
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PluginError::Init("missing schema".to_string());
        assert_eq!(err.to_string(), "Initialization failed: missing schema");

        let err = PluginError::CapabilityDenied("network".to_string());
        assert!(err.to_string().contains("network"));

        let err = PluginError::custom("something happened");
        assert_eq!(err.to_string(), "something happened");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PluginError = io_err.into();
        assert!(matches!(err, PluginError::Io(_)));
    }
}
