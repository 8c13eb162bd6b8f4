//! Error types and handling
//!
//! This module provides the error type shared by the packager and the engine.
//! Every error implements the `PluginErrorExt` trait which provides a
//! user-friendly hint and the negative code used in response envelopes.
//!
//! # Security
//!
//! Hints are static strings. They never echo key material, file paths or
//! the raw cause, so they are what remote callers see. The full error is
//! only logged.

use thiserror::Error;

/// Trait for plugin error extensions
pub trait PluginErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns the negative envelope code for this error
    ///
    /// `-404` when a referenced plugin is unknown, `-400` when the caller
    /// supplied something unusable (bad package, bad key, bad signature),
    /// and `-500` for everything else.
    fn response_code(&self) -> i32;
}

/// Main plugin error type
///
/// # Error Categories
///
/// - **Io**: source bytes or files cannot be read
/// - **Format**: the source is not a valid package or metadata shape
/// - **Key**: malformed or unparsable key material
/// - **Verification**: no trust key's signature check matched
/// - **NotFound**: referenced plugin identifier is unknown to the store
///
/// # Examples
///
/// ```
/// use sdk::errors::{PluginError, PluginErrorExt};
///
/// let error = PluginError::NotFound("acme/demo:0.0.1".to_string());
/// assert_eq!(error.response_code(), -404);
/// assert_eq!(error.user_hint(), "Plugin not found");
/// ```
#[derive(Debug, Error)]
pub enum PluginError {
    // Source errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid package format: {0}")]
    Format(String),

    // Security errors
    #[error("Invalid key material: {0}")]
    Key(String),

    #[error("Signature verification failed: {0}")]
    Verification(String),

    // Store errors
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    // Install errors
    #[error("Install failed: {0}")]
    Install(String),

    #[error("Install cancelled: {0}")]
    Cancelled(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PluginErrorExt for PluginError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Io(_) => "Failed to read the plugin package",
            Self::Format(_) => "The file is not a valid plugin package",
            Self::Key(_) => "Signing key could not be loaded. Check the key file",
            Self::Verification(_) => {
                "Plugin signature verification failed. The package may be tampered"
            }
            Self::NotFound(_) => "Plugin not found",
            Self::Database(_) => "Database operation failed. Try again later",
            Self::Install(_) => "Plugin installation failed",
            Self::Cancelled(_) => "Plugin installation was cancelled",
            Self::Config(_) => "Check your configuration for errors",
        }
    }

    fn response_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => -404,
            Self::Format(_) | Self::Key(_) | Self::Verification(_) => -400,
            _ => -500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_codes() {
        assert_eq!(PluginError::NotFound("x".into()).response_code(), -404);
        assert_eq!(PluginError::Verification("x".into()).response_code(), -400);
        assert_eq!(PluginError::Database("x".into()).response_code(), -500);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(PluginError::from(io).response_code(), -500);
    }

    #[test]
    fn test_hint_hides_cause() {
        let err = PluginError::Key("/etc/plugd/keys/ops.pem: bad header".into());
        assert!(!err.user_hint().contains("/etc/plugd"));
        assert!(err.to_string().contains("/etc/plugd"));
    }
}
