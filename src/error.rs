//! Error types for parley.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Recognition session errors
    #[error("Recognition connection failed: {message}")]
    Connection { message: String },

    #[error("Malformed recognition event: {message}")]
    MalformedEvent { message: String },

    // Enrichment service errors
    #[error("Translation failed: {message}")]
    Translation { message: String },

    #[error("Suggestion request failed: {message}")]
    Suggestion { message: String },

    // Push channel errors
    #[error("Push channel protocol error: {message}")]
    Protocol { message: String },

    #[error("Failed to deliver to client channel: {message}")]
    ChannelSend { message: String },

    // JSON (de)serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn device_not_found_display() {
        let error = ParleyError::DeviceNotFound {
            device: "CABLE Output".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: CABLE Output");
    }

    #[test]
    fn connection_display() {
        let error = ParleyError::Connection {
            message: "handshake refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Recognition connection failed: handshake refused"
        );
    }

    #[test]
    fn translation_display() {
        let error = ParleyError::Translation {
            message: "quota exceeded".to_string(),
        };
        assert_eq!(error.to_string(), "Translation failed: quota exceeded");
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "socket gone");
        let error: ParleyError = io_error.into();
        assert!(error.to_string().contains("socket gone"));
    }

    #[test]
    fn from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("a = b = c").unwrap_err();
        let error: ParleyError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let error: ParleyError = json_error.into();
        assert!(error.to_string().contains("JSON error"));
    }

    #[test]
    fn error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let error: ParleyError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ParleyError>();
        assert_sync::<ParleyError>();
    }

    #[test]
    fn result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(7)
        }
        assert_eq!(returns_result().unwrap(), 7);
    }
}
