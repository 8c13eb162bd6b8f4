//! Install events and response envelopes

use serde::{Deserialize, Serialize};

use crate::errors::{PluginError, PluginErrorExt};

/// Stage reported by an install event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStage {
    /// The install procedure accepted the package
    Started,
    /// Package files are being extracted
    Extracting,
    /// The plugin declaration is being validated
    Validating,
    /// The plugin is being registered for the workspace
    Registering,
    /// Install finished successfully (terminal)
    Done,
    /// Install failed (terminal)
    Error,
    /// Install was cancelled by the caller (terminal)
    Cancelled,
    /// Install exceeded its deadline (terminal)
    Timeout,
}

impl InstallStage {
    /// Whether no further events follow this stage
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Error | Self::Cancelled | Self::Timeout
        )
    }
}

/// A discrete unit of install progress, relayed to the caller unmodified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallEvent {
    pub stage: InstallStage,
    pub message: String,
    /// Unique identifier of the plugin, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_unique_identifier: Option<String>,
}

impl InstallEvent {
    /// Create an event for a stage
    pub fn new(stage: InstallStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            plugin_unique_identifier: None,
        }
    }

    /// Attach the plugin unique identifier
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.plugin_unique_identifier = Some(identifier.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Uniform response envelope: `{code, message, data}`
///
/// `code` is `0` on success and a negative integer on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Response<T = serde_json::Value> {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Response<T> {
    /// Successful envelope carrying `data`
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    /// Failed envelope with an explicit code
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Failed envelope derived from a plugin error
    ///
    /// Carries the static hint, never the error's own message.
    pub fn from_error(err: &PluginError) -> Self {
        Self::error(err.response_code(), err.user_hint())
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = InstallEvent::new(InstallStage::Done, "installed").with_identifier("a/b:1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stage"], "done");
        assert_eq!(json["plugin_unique_identifier"], "a/b:1");
        assert!(event.is_terminal());
    }

    #[test]
    fn test_error_envelope_omits_data() {
        let resp: Response = Response::from_error(&PluginError::NotFound("x".into()));
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(resp.code, -404);
        assert_eq!(resp.message, "Plugin not found");
        assert!(!json.contains("data"));
    }
}
