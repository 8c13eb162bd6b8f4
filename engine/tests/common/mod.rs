//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use packager::decoder::archive::write_archive;
use packager::decoder::SignatureMeta;
use packager::keys::{load_private_key_file, load_public_key_file};
use packager::signer::sign_archive_bytes;
use packager::{PackageDecoder, TimestampPolicy, TrustKeySet};
use plugd_engine::db::{InstallationRecord, PluginRecord};
use plugd_engine::installer::PluginStore;
use sdk::errors::PluginError;
use sdk::manifest::{PluginDeclaration, PluginUniqueIdentifier};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const MANIFEST: &[u8] = b"name: demo\nversion: 0.0.1\nauthor: acme\nlabel: Demo\n";
pub const MAIN_SRC: &[u8] = b"print('hello world')";

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../packager/tests/fixtures")
        .join(name)
}

/// Trust set holding only one fixture key
pub fn trust(name: &str) -> Arc<TrustKeySet> {
    let key = load_public_key_file(&fixture(&format!("{}.public.pem", name))).unwrap();
    Arc::new(TrustKeySet::from_keys(vec![key]).unwrap())
}

pub fn unsigned_package(files: &[(&str, &[u8])]) -> Vec<u8> {
    write_archive(
        files,
        Some(&SignatureMeta {
            signature: String::new(),
            time: 1700000000,
        }),
    )
    .unwrap()
}

/// Demo package signed by a fixture key
pub fn signed_package(signer: &str) -> Vec<u8> {
    signed_files(signer, &[("manifest.yaml", MANIFEST), ("main.src", MAIN_SRC)])
}

pub fn signed_files(signer: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let key = load_private_key_file(&fixture(&format!("{}.private.pem", signer))).unwrap();
    sign_archive_bytes(&unsigned_package(files), &key, TimestampPolicy::Reuse).unwrap()
}

/// In-memory plugin registry
#[derive(Default)]
pub struct MemoryStore {
    plugins: Mutex<HashMap<String, PluginRecord>>,
    installations: Mutex<Vec<InstallationRecord>>,
}

impl MemoryStore {
    pub fn installations(&self) -> Vec<InstallationRecord> {
        self.installations.lock().unwrap().clone()
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.lock().unwrap().len()
    }
}

#[async_trait]
impl PluginStore for MemoryStore {
    async fn get_plugin(
        &self,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<Option<PluginRecord>, PluginError> {
        Ok(self
            .plugins
            .lock()
            .unwrap()
            .get(identifier.as_str())
            .cloned())
    }

    async fn register_plugin(
        &self,
        identifier: &PluginUniqueIdentifier,
        declaration: &PluginDeclaration,
    ) -> Result<PluginRecord, PluginError> {
        let mut plugins = self.plugins.lock().unwrap();
        let next_id = plugins.len() as i64 + 1;
        let record = plugins
            .entry(identifier.to_string())
            .or_insert_with(|| PluginRecord {
                id: next_id,
                plugin_id: identifier.plugin_id(),
                plugin_unique_identifier: identifier.to_string(),
                declaration: declaration.clone(),
                install_type: "local".to_string(),
                created_at: 0,
            });
        Ok(record.clone())
    }

    async fn create_installation(
        &self,
        tenant_id: &str,
        plugin: &PluginRecord,
    ) -> Result<InstallationRecord, PluginError> {
        let mut installations = self.installations.lock().unwrap();
        let record = InstallationRecord {
            id: installations.len() as i64 + 1,
            tenant_id: tenant_id.to_string(),
            plugin_unique_identifier: plugin.plugin_unique_identifier.clone(),
            plugin_id: plugin.plugin_id.clone(),
            created_at: 0,
        };
        installations.push(record.clone());
        Ok(record)
    }
}

/// Decoder with no entries that counts `close` calls
pub struct CountingDecoder {
    pub closes: Arc<AtomicUsize>,
}

impl CountingDecoder {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        (
            Self {
                closes: Arc::clone(&closes),
            },
            closes,
        )
    }
}

impl PackageDecoder for CountingDecoder {
    fn walk(
        &self,
        _visit: &mut dyn FnMut(&str, &str) -> Result<(), PluginError>,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, PluginError> {
        Err(PluginError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            path.to_string(),
        )))
    }

    fn signature(&self) -> Result<String, PluginError> {
        Ok(String::new())
    }

    fn create_time(&self) -> Result<i64, PluginError> {
        Ok(0)
    }

    fn close(&self) -> Result<(), PluginError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
