//! Install orchestration
//!
//! Two entry points:
//!
//! - [`InstallOrchestrator::install_from_bytes`] opens an uploaded archive,
//!   verifies it when the deployment enforces signatures, and runs the
//!   [`InstallProcedure`] on a background worker. Progress reaches the caller
//!   as an [`InstallStream`] bounded by an overall deadline.
//! - [`InstallOrchestrator::install_from_identifier`] associates a tenant with
//!   a plugin build that was verified when it was first uploaded. It does not
//!   verify again.
//!
//! The worker releases the package handle on every exit path: completion,
//! failure, caller cancellation and timeout.

use async_trait::async_trait;
use packager::{verify_plugin_with_keys, ArchiveDecoder, PackageHandle, TrustKeySet};
use sdk::errors::{PluginError, PluginErrorExt};
use sdk::manifest::{PluginDeclaration, PluginUniqueIdentifier};
use sdk::types::{InstallEvent, InstallStage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{InstallationRecord, PluginRecord};

pub mod local;
pub mod stream;

pub use local::LocalInstaller;
pub use stream::InstallStream;

/// Sending half of an install event channel
pub type EventSink = mpsc::Sender<InstallEvent>;

/// Persistent plugin registry consumed by the installer
#[async_trait]
pub trait PluginStore: Send + Sync {
    async fn get_plugin(
        &self,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<Option<PluginRecord>, PluginError>;

    async fn register_plugin(
        &self,
        identifier: &PluginUniqueIdentifier,
        declaration: &PluginDeclaration,
    ) -> Result<PluginRecord, PluginError>;

    async fn create_installation(
        &self,
        tenant_id: &str,
        plugin: &PluginRecord,
    ) -> Result<InstallationRecord, PluginError>;
}

/// Performs the actual install of one opened package
///
/// Implementations emit progress into `sink` and a final `done` event on
/// success. Failures are returned; the orchestrator turns them into the
/// terminal `error` event. Timeout and cancellation are owned by the
/// orchestrator, which drops the returned future when either fires.
#[async_trait]
pub trait InstallProcedure: Send + Sync {
    async fn install(
        &self,
        tenant_id: &str,
        package: &PackageHandle,
        sink: &EventSink,
    ) -> Result<(), PluginError>;
}

/// Send one event, failing with `Cancelled` once the consumer is gone
pub async fn emit(sink: &EventSink, event: InstallEvent) -> Result<(), PluginError> {
    sink.send(event)
        .await
        .map_err(|_| PluginError::Cancelled("install stream closed".to_string()))
}

/// Result of installing a registered plugin for a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierInstall {
    pub plugin: PluginRecord,
    pub installation: InstallationRecord,
}

/// Drives install procedures under a deadline
pub struct InstallOrchestrator {
    procedure: Arc<dyn InstallProcedure>,
    store: Arc<dyn PluginStore>,
    /// `Some` when uploads must verify before installing
    trust: Option<Arc<TrustKeySet>>,
    timeout: Duration,
    channel_capacity: usize,
    max_package_size: usize,
    max_unpacked_size: u64,
}

enum Outcome {
    Finished(Result<(), PluginError>),
    Cancelled,
    TimedOut,
}

impl InstallOrchestrator {
    /// Orchestrator with default limits and no signature enforcement
    pub fn new(procedure: Arc<dyn InstallProcedure>, store: Arc<dyn PluginStore>) -> Self {
        let defaults = crate::config::InstallConfig::default();
        Self {
            procedure,
            store,
            trust: None,
            timeout: Duration::from_secs(defaults.timeout_secs),
            channel_capacity: defaults.channel_capacity,
            max_package_size: defaults.max_package_size,
            max_unpacked_size: defaults.max_unpacked_size,
        }
    }

    /// Orchestrator configured from `config`, sharing an already-built trust set
    pub fn from_config(
        config: &Config,
        procedure: Arc<dyn InstallProcedure>,
        store: Arc<dyn PluginStore>,
        trust: Arc<TrustKeySet>,
    ) -> Self {
        let mut orchestrator = Self::new(procedure, store)
            .with_timeout(config.install_timeout())
            .with_channel_capacity(config.install.channel_capacity)
            .with_max_package_size(config.install.max_package_size)
            .with_max_unpacked_size(config.install.max_unpacked_size);
        if config.signature.force_verify {
            orchestrator = orchestrator.with_verification(trust);
        }
        orchestrator
    }

    /// Require uploads to verify against `trust` before installing
    pub fn with_verification(mut self, trust: Arc<TrustKeySet>) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_max_package_size(mut self, size: usize) -> Self {
        self.max_package_size = size;
        self
    }

    /// Cap on the declared uncompressed content of an upload
    pub fn with_max_unpacked_size(mut self, size: u64) -> Self {
        self.max_unpacked_size = size;
        self
    }

    pub fn enforces_verification(&self) -> bool {
        self.trust.is_some()
    }

    /// Install an uploaded archive
    ///
    /// Decode and verification failures are returned directly and no install
    /// event is ever produced for them.
    pub async fn install_from_bytes(
        &self,
        tenant_id: &str,
        bytes: Vec<u8>,
    ) -> Result<InstallStream, PluginError> {
        if bytes.len() > self.max_package_size {
            return Err(PluginError::Format(format!(
                "Package is {} bytes, limit is {}",
                bytes.len(),
                self.max_package_size
            )));
        }

        let handle = self.open_and_verify(bytes).await?;
        Ok(self.spawn_install(tenant_id, handle))
    }

    /// Decode, and verify when enforced, off the async runtime
    async fn open_and_verify(&self, bytes: Vec<u8>) -> Result<PackageHandle, PluginError> {
        let trust = self.trust.clone();
        let max_unpacked_size = self.max_unpacked_size;

        tokio::task::spawn_blocking(move || {
            let handle =
                PackageHandle::new(ArchiveDecoder::open_with_limit(bytes, max_unpacked_size)?);
            if let Some(keys) = trust {
                if let Err(e) = verify_plugin_with_keys(handle.decoder(), &keys) {
                    release(handle);
                    return Err(e);
                }
            }
            Ok(handle)
        })
        .await
        .map_err(|e| PluginError::Install(format!("Package check task failed: {}", e)))?
    }

    /// Run the procedure over an already-opened package
    ///
    /// The handle is released by the worker whatever the outcome.
    pub fn spawn_install(&self, tenant_id: &str, handle: PackageHandle) -> InstallStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let token = CancellationToken::new();
        let deadline = Instant::now() + self.timeout;

        let procedure = Arc::clone(&self.procedure);
        let worker_token = token.clone();
        let tenant_id = tenant_id.to_string();

        tokio::spawn(async move {
            debug!("Install worker started for tenant {}", tenant_id);

            let outcome = tokio::select! {
                result = procedure.install(&tenant_id, &handle, &tx) => Outcome::Finished(result),
                () = worker_token.cancelled() => Outcome::Cancelled,
                () = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
            };
            release(handle);

            let terminal = match outcome {
                Outcome::Finished(Ok(())) => {
                    info!("Install finished for tenant {}", tenant_id);
                    None
                }
                Outcome::Finished(Err(PluginError::Cancelled(reason))) => {
                    debug!("Install stopped: {}", reason);
                    None
                }
                Outcome::Finished(Err(e)) => {
                    error!("Install failed for tenant {}: {}", tenant_id, e);
                    Some(InstallEvent::new(InstallStage::Error, e.user_hint()))
                }
                Outcome::Cancelled => {
                    warn!("Install cancelled for tenant {}", tenant_id);
                    Some(InstallEvent::new(InstallStage::Cancelled, "install cancelled"))
                }
                Outcome::TimedOut => {
                    warn!("Install timed out for tenant {}", tenant_id);
                    Some(InstallEvent::new(InstallStage::Timeout, "install timed out"))
                }
            };

            if let Some(event) = terminal {
                // Skipped when the consumer stopped reading and the buffer is full
                if tx.try_send(event).is_err() {
                    debug!("Terminal install event dropped");
                }
            }
        });

        InstallStream::new(rx, token)
    }

    /// Install a previously registered plugin build for a tenant
    pub async fn install_from_identifier(
        &self,
        tenant_id: &str,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<IdentifierInstall, PluginError> {
        let plugin = self
            .store
            .get_plugin(identifier)
            .await?
            .ok_or_else(|| PluginError::NotFound(identifier.to_string()))?;

        let installation = self.store.create_installation(tenant_id, &plugin).await?;
        info!(
            "Installed {} for tenant {}",
            plugin.plugin_unique_identifier, tenant_id
        );

        Ok(IdentifierInstall {
            plugin,
            installation,
        })
    }
}

fn release(handle: PackageHandle) {
    if let Err(e) = handle.release() {
        warn!("Failed to release package: {}", e);
    }
}
