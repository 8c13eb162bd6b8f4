//! Command handlers for CLI operations
//!
//! - signature generate: Create a signing key pair
//! - signature sign: Sign a package in place
//! - signature verify: Check a package signature
//! - serve: Run the plugin install API
//!
//! Outcomes are reported as log lines. A failed command returns an error so
//! the process exits non-zero, and never reports partial success.

use anyhow::{Context, Result};
use packager::keys::{generate_key_pair, load_public_key_file, DEFAULT_KEY_BITS};
use packager::{
    open_package, sign_plugin, verify_plugin_with_key, verify_plugin_with_keys, TimestampPolicy,
    TrustKeySet, TrustTier,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::api;
use crate::config::Config;
use crate::db::Database;
use crate::installer::{InstallOrchestrator, LocalInstaller, PluginStore};

/// Generate `<filename>.private.pem` and `<filename>.public.pem`
pub fn handle_generate(filename: &str) -> Result<()> {
    match generate_key_pair(filename, DEFAULT_KEY_BITS) {
        Ok((private_path, public_path)) => {
            info!(
                private_key = %private_path.display(),
                public_key = %public_path.display(),
                "Key pair generated"
            );
            Ok(())
        }
        Err(e) => {
            error!("Failed to generate key pair: {}", e);
            Err(e).context("Key pair generation failed")
        }
    }
}

/// Sign a package archive or directory in place
pub fn handle_sign(package_path: &Path, private_key: &Path, reuse_timestamp: bool) -> Result<()> {
    let policy = if reuse_timestamp {
        TimestampPolicy::Reuse
    } else {
        TimestampPolicy::Refresh
    };

    match sign_plugin(package_path, private_key, policy) {
        Ok(()) => {
            info!(package = %package_path.display(), "Plugin signed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Failed to sign plugin {}: {}", package_path.display(), e);
            Err(e).context("Signing failed")
        }
    }
}

/// Verify a package against one public key, or the built-in key when none is given
pub fn handle_verify(package_path: &Path, public_key: Option<&Path>) -> Result<()> {
    let result = open_package(package_path).and_then(|handle| {
        let outcome = match public_key {
            Some(path) => load_public_key_file(path)
                .and_then(|key| verify_plugin_with_key(handle.decoder(), &key))
                .map(|()| None),
            None => TrustKeySet::official()
                .and_then(|keys| verify_plugin_with_keys(handle.decoder(), &keys))
                .map(Some),
        };
        handle.release()?;
        outcome
    });

    match result {
        Ok(tier) => {
            let signer = match tier {
                Some(TrustTier::Official) => "official",
                _ => "provided key",
            };
            info!(package = %package_path.display(), signer, "Plugin signature verified");
            Ok(())
        }
        Err(e) => {
            error!("Failed to verify plugin {}: {}", package_path.display(), e);
            Err(e).context("Verification failed")
        }
    }
}

/// Run the plugin install API until Ctrl-C
pub async fn handle_serve(config: &Config) -> Result<()> {
    config.ensure_data_dir()?;

    // Loaded once, before any request is accepted
    let trust = config
        .trust_key_set()
        .context("Failed to load signature verification keys")?;
    info!("Trusting {} signature key(s)", trust.len());

    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;
    let store: Arc<dyn PluginStore> = Arc::new(database.plugins());

    let procedure = Arc::new(LocalInstaller::new(
        config.plugins_dir(),
        Arc::clone(&store),
    ));
    let orchestrator = Arc::new(InstallOrchestrator::from_config(
        config, procedure, store, trust,
    ));
    if !orchestrator.enforces_verification() {
        info!("Signature verification is disabled for uploads");
    }

    let app = api::router(orchestrator, config.install.max_package_size);
    api::serve(&config.server.listen_addr, app, async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
    })
    .await?;

    database.close().await;
    Ok(())
}
