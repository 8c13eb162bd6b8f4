//! Plugd Engine Library
//!
//! Install service and signature tooling for plugin packages. Used by the
//! `plugd` binary and by the integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Database persistence module
pub mod db;

/// Install orchestration and the local install procedure
pub mod installer;

/// HTTP service boundary
pub mod api;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
