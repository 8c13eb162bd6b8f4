//! Local filesystem install procedure
//!
//! Extracts the package into a staging directory under the plugins
//! directory, validates `manifest.yaml`, moves the tree to its final
//! location and registers the build for the tenant.

use async_trait::async_trait;
use packager::digest::{canonical_digest, compute_hash};
use packager::{PackageDecoder, PackageHandle};
use sdk::errors::PluginError;
use sdk::manifest::{PluginDeclaration, PluginUniqueIdentifier, MANIFEST_FILE};
use sdk::types::{InstallEvent, InstallStage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

use super::{emit, EventSink, InstallProcedure, PluginStore};

/// Installs packages into `<plugins_dir>/<author>/<name>-<version>-<checksum>`
pub struct LocalInstaller {
    plugins_dir: PathBuf,
    store: Arc<dyn PluginStore>,
}

impl LocalInstaller {
    pub fn new(plugins_dir: impl Into<PathBuf>, store: Arc<dyn PluginStore>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            store,
        }
    }

    /// Final directory of an installed build
    pub fn install_dir(&self, identifier: &PluginUniqueIdentifier) -> PathBuf {
        let author = match identifier.author() {
            "" => "_",
            author => author,
        };
        self.plugins_dir.join(author).join(format!(
            "{}-{}-{}",
            identifier.name(),
            identifier.version(),
            identifier.checksum()
        ))
    }

    /// Copy every entry into a fresh staging directory
    async fn extract(&self, package: &PackageHandle) -> Result<TempDir, PluginError> {
        let decoder = package.shared();
        let plugins_dir = self.plugins_dir.clone();
        blocking(move || extract_into(&plugins_dir, decoder.as_ref())).await
    }

    /// Move the staged tree into place; an existing install of the same build wins
    ///
    /// Concurrent installs of one build race on the rename. Whoever loses
    /// finds the target populated and keeps it.
    async fn commit(&self, staging: TempDir, target: &Path) -> Result<(), PluginError> {
        if tokio::fs::try_exists(target).await? {
            debug!("{} already present", target.display());
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::rename(staging.path(), target).await {
            if !tokio::fs::try_exists(target).await? {
                return Err(e.into());
            }
            debug!("{} installed concurrently ({})", target.display(), e);
        }
        Ok(())
    }
}

/// Run decoder work off the async runtime
async fn blocking<T, F>(work: F) -> Result<T, PluginError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PluginError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PluginError::Install(format!("Package task failed: {}", e)))?
}

fn extract_into(plugins_dir: &Path, package: &dyn PackageDecoder) -> Result<TempDir, PluginError> {
    std::fs::create_dir_all(plugins_dir)?;
    let staging = TempDir::new_in(plugins_dir)?;

    for entry in package.entries()? {
        let contents = package.read_file(&entry)?;
        let target = staging.path().join(&entry);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, contents)?;
        debug!("Extracted {}", entry);
    }

    Ok(staging)
}

#[async_trait]
impl InstallProcedure for LocalInstaller {
    async fn install(
        &self,
        tenant_id: &str,
        package: &PackageHandle,
        sink: &EventSink,
    ) -> Result<(), PluginError> {
        emit(
            sink,
            InstallEvent::new(InstallStage::Started, "installing plugin package"),
        )
        .await?;

        emit(
            sink,
            InstallEvent::new(InstallStage::Extracting, "extracting package files"),
        )
        .await?;
        let staging = self.extract(package).await?;

        emit(
            sink,
            InstallEvent::new(InstallStage::Validating, "validating plugin declaration"),
        )
        .await?;
        let manifest = tokio::fs::read(staging.path().join(MANIFEST_FILE))
            .await
            .map_err(|_| PluginError::Format(format!("Package has no {}", MANIFEST_FILE)))?;
        let declaration = PluginDeclaration::from_yaml(&manifest)?;
        let decoder = package.shared();
        let checksum =
            blocking(move || canonical_digest(decoder.as_ref()).map(|d| compute_hash(&d))).await?;
        let identifier = declaration.unique_identifier(&checksum)?;

        self.commit(staging, &self.install_dir(&identifier)).await?;

        emit(
            sink,
            InstallEvent::new(InstallStage::Registering, "registering plugin")
                .with_identifier(identifier.as_str()),
        )
        .await?;
        let plugin = self.store.register_plugin(&identifier, &declaration).await?;
        self.store.create_installation(tenant_id, &plugin).await?;

        info!("Plugin {} installed for tenant {}", identifier, tenant_id);
        emit(
            sink,
            InstallEvent::new(InstallStage::Done, "plugin installed")
                .with_identifier(identifier.as_str()),
        )
        .await
    }
}
