//! Plugd SDK
//!
//! Shared types for the plugd packager and engine: the error taxonomy,
//! install progress events, the response envelope returned by the service
//! boundary, and plugin declarations.

/// Error types and handling
pub mod errors;

/// Install events and response envelopes
pub mod types;

/// Plugin declaration and unique identifier
pub mod manifest;

// Re-export commonly used types
pub use errors::{PluginError, PluginErrorExt};
pub use manifest::{PluginDeclaration, PluginUniqueIdentifier};
pub use types::{InstallEvent, InstallStage, Response};
