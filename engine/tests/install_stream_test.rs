//! Integration tests for install orchestration
//!
//! Validates:
//! - Verification gating (no events for rejected packages)
//! - Event ordering for a full local install
//! - Timeout and cancellation terminal events
//! - Package handle release on every exit path
//! - Size limits on uploads
//! - Concurrent installs of one build
//! - Install from identifier

mod common;

use async_trait::async_trait;
use futures::StreamExt;
use packager::PackageHandle;
use plugd_engine::db::Database;
use plugd_engine::installer::{
    emit, EventSink, InstallOrchestrator, InstallProcedure, LocalInstaller, PluginStore,
};
use sdk::errors::PluginError;
use sdk::manifest::PluginUniqueIdentifier;
use sdk::types::{InstallEvent, InstallStage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::{signed_files, signed_package, trust, unsigned_package, CountingDecoder, MemoryStore};

/// Emits `started` and then never finishes
struct HangingProcedure;

#[async_trait]
impl InstallProcedure for HangingProcedure {
    async fn install(
        &self,
        _tenant_id: &str,
        _package: &PackageHandle,
        sink: &EventSink,
    ) -> Result<(), PluginError> {
        emit(sink, InstallEvent::new(InstallStage::Started, "started")).await?;
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Counts invocations and fails
#[derive(Default)]
struct FailingProcedure {
    calls: AtomicUsize,
}

#[async_trait]
impl InstallProcedure for FailingProcedure {
    async fn install(
        &self,
        _tenant_id: &str,
        _package: &PackageHandle,
        sink: &EventSink,
    ) -> Result<(), PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        emit(sink, InstallEvent::new(InstallStage::Started, "started")).await?;
        Err(PluginError::Install("disk full".to_string()))
    }
}

fn stages(events: &[InstallEvent]) -> Vec<InstallStage> {
    events.iter().map(|e| e.stage).collect()
}

async fn wait_for_release(closes: &AtomicUsize) {
    for _ in 0..100 {
        if closes.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn local_orchestrator(dir: &TempDir, store: Arc<MemoryStore>) -> InstallOrchestrator {
    let procedure = Arc::new(LocalInstaller::new(
        dir.path().join("plugins"),
        Arc::clone(&store) as Arc<dyn PluginStore>,
    ));
    InstallOrchestrator::new(procedure, store)
}

#[tokio::test]
async fn test_verified_package_installs_with_ordered_events() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    let orchestrator = local_orchestrator(&dir, Arc::clone(&store)).with_verification(trust("alice"));

    let stream = orchestrator
        .install_from_bytes("tenant-a", signed_package("alice"))
        .await
        .unwrap();
    let events: Vec<InstallEvent> = stream.collect().await;

    assert_eq!(
        stages(&events),
        vec![
            InstallStage::Started,
            InstallStage::Extracting,
            InstallStage::Validating,
            InstallStage::Registering,
            InstallStage::Done,
        ]
    );

    let identifier: PluginUniqueIdentifier = events[4]
        .plugin_unique_identifier
        .clone()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(identifier.plugin_id(), "acme/demo");
    assert_eq!(identifier.version(), "0.0.1");

    let installed = dir
        .path()
        .join("plugins/acme")
        .join(format!("demo-0.0.1-{}", identifier.checksum()));
    assert_eq!(
        std::fs::read(installed.join("main.src")).unwrap(),
        common::MAIN_SRC
    );

    let installations = store.installations();
    assert_eq!(installations.len(), 1);
    assert_eq!(installations[0].tenant_id, "tenant-a");
}

#[tokio::test]
async fn test_verification_failure_emits_no_events() {
    let procedure = Arc::new(FailingProcedure::default());
    let orchestrator = InstallOrchestrator::new(
        Arc::clone(&procedure) as Arc<dyn InstallProcedure>,
        Arc::new(MemoryStore::default()),
    )
    .with_verification(trust("alice"));

    let result = orchestrator
        .install_from_bytes("tenant-a", signed_package("bob"))
        .await;

    assert!(matches!(result, Err(PluginError::Verification(_))));
    assert_eq!(procedure.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unsigned_package_rejected_when_enforced() {
    let orchestrator = InstallOrchestrator::new(
        Arc::new(FailingProcedure::default()),
        Arc::new(MemoryStore::default()),
    )
    .with_verification(trust("alice"));

    let bytes = packager::decoder::archive::write_archive(&[("main.src", b"x")], None).unwrap();
    assert!(matches!(
        orchestrator.install_from_bytes("tenant-a", bytes).await,
        Err(PluginError::Format(_))
    ));
}

#[tokio::test]
async fn test_unverified_install_when_not_enforced() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    let orchestrator = local_orchestrator(&dir, Arc::clone(&store));
    assert!(!orchestrator.enforces_verification());

    let bytes = unsigned_package(&[("manifest.yaml", common::MANIFEST)]);
    let events: Vec<InstallEvent> = orchestrator
        .install_from_bytes("tenant-a", bytes)
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(events.last().unwrap().stage, InstallStage::Done);
    assert_eq!(store.plugin_count(), 1);
}

#[tokio::test]
async fn test_oversized_package_rejected() {
    let orchestrator = InstallOrchestrator::new(
        Arc::new(FailingProcedure::default()),
        Arc::new(MemoryStore::default()),
    )
    .with_max_package_size(16);

    assert!(matches!(
        orchestrator.install_from_bytes("tenant-a", vec![0u8; 17]).await,
        Err(PluginError::Format(_))
    ));
}

#[tokio::test]
async fn test_package_over_unpacked_limit_rejected() {
    let procedure = Arc::new(FailingProcedure::default());
    let orchestrator = InstallOrchestrator::new(
        Arc::clone(&procedure) as Arc<dyn InstallProcedure>,
        Arc::new(MemoryStore::default()),
    )
    .with_max_unpacked_size(64 * 1024);

    let zeros = vec![0u8; 1024 * 1024];
    let bytes = unsigned_package(&[
        ("manifest.yaml", common::MANIFEST),
        ("blob.bin", zeros.as_slice()),
    ]);
    assert!(bytes.len() < 64 * 1024);

    assert!(matches!(
        orchestrator.install_from_bytes("tenant-a", bytes).await,
        Err(PluginError::Format(_))
    ));
    assert_eq!(procedure.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_installs_of_same_build() {
    let bytes = signed_package("alice");

    for _ in 0..4 {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let orchestrator = local_orchestrator(&dir, Arc::clone(&store));

        let (first, second) = tokio::join!(
            orchestrator.install_from_bytes("tenant-a", bytes.clone()),
            orchestrator.install_from_bytes("tenant-b", bytes.clone()),
        );
        let (first, second) = tokio::join!(
            first.unwrap().collect::<Vec<InstallEvent>>(),
            second.unwrap().collect::<Vec<InstallEvent>>(),
        );

        assert_eq!(first.last().unwrap().stage, InstallStage::Done);
        assert_eq!(second.last().unwrap().stage, InstallStage::Done);
        assert_eq!(store.plugin_count(), 1);
        assert_eq!(store.installations().len(), 2);

        let author_dir = dir.path().join("plugins/acme");
        assert_eq!(std::fs::read_dir(&author_dir).unwrap().count(), 1);
    }
}

#[tokio::test]
async fn test_invalid_manifest_ends_with_error_event() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    let orchestrator = local_orchestrator(&dir, Arc::clone(&store)).with_verification(trust("alice"));

    let bytes = signed_files("alice", &[("manifest.yaml", b"name: Not Valid!\n")]);
    let events: Vec<InstallEvent> = orchestrator
        .install_from_bytes("tenant-a", bytes)
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(events.last().unwrap().stage, InstallStage::Error);
    assert_eq!(store.plugin_count(), 0);
}

#[tokio::test]
async fn test_procedure_error_ends_with_error_event() {
    let orchestrator = InstallOrchestrator::new(
        Arc::new(FailingProcedure::default()),
        Arc::new(MemoryStore::default()),
    );
    let (decoder, closes) = CountingDecoder::new();

    let events: Vec<InstallEvent> = orchestrator
        .spawn_install("tenant-a", PackageHandle::new(decoder))
        .collect()
        .await;

    assert_eq!(
        stages(&events),
        vec![InstallStage::Started, InstallStage::Error]
    );
    assert_eq!(events[1].message, "Plugin installation failed");
    assert!(!events[1].message.contains("disk full"));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timeout_emits_terminal_event_and_releases() {
    let orchestrator = InstallOrchestrator::new(
        Arc::new(HangingProcedure),
        Arc::new(MemoryStore::default()),
    )
    .with_timeout(Duration::from_millis(100));
    let (decoder, closes) = CountingDecoder::new();

    let events: Vec<InstallEvent> = orchestrator
        .spawn_install("tenant-a", PackageHandle::new(decoder))
        .collect()
        .await;

    assert_eq!(
        stages(&events),
        vec![InstallStage::Started, InstallStage::Timeout]
    );
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_emits_terminal_event_and_releases() {
    let orchestrator = InstallOrchestrator::new(
        Arc::new(HangingProcedure),
        Arc::new(MemoryStore::default()),
    );
    let (decoder, closes) = CountingDecoder::new();

    let mut stream = orchestrator.spawn_install("tenant-a", PackageHandle::new(decoder));
    let first = stream.next().await.unwrap();
    assert_eq!(first.stage, InstallStage::Started);

    stream.cancel();
    let last = stream.next().await.unwrap();
    assert_eq!(last.stage, InstallStage::Cancelled);
    assert!(stream.next().await.is_none());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropping_stream_releases_package() {
    let orchestrator = InstallOrchestrator::new(
        Arc::new(HangingProcedure),
        Arc::new(MemoryStore::default()),
    );
    let (decoder, closes) = CountingDecoder::new();

    let mut stream = orchestrator.spawn_install("tenant-a", PackageHandle::new(decoder));
    stream.next().await.unwrap();
    drop(stream);

    wait_for_release(&closes).await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_install_from_unknown_identifier_is_not_found() {
    let orchestrator = InstallOrchestrator::new(
        Arc::new(FailingProcedure::default()),
        Arc::new(MemoryStore::default()),
    );
    let identifier: PluginUniqueIdentifier =
        "acme/demo:0.0.1@b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
            .parse()
            .unwrap();

    assert!(matches!(
        orchestrator
            .install_from_identifier("tenant-a", &identifier)
            .await,
        Err(PluginError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_install_from_identifier_after_upload() {
    let dir = TempDir::new().unwrap();
    let database = Database::new(&dir.path().join("plugd.db")).await.unwrap();
    let store: Arc<dyn PluginStore> = Arc::new(database.plugins());
    let procedure = Arc::new(LocalInstaller::new(
        dir.path().join("plugins"),
        Arc::clone(&store),
    ));
    let orchestrator = InstallOrchestrator::new(procedure, Arc::clone(&store))
        .with_verification(trust("alice"));

    let events: Vec<InstallEvent> = orchestrator
        .install_from_bytes("tenant-a", signed_package("alice"))
        .await
        .unwrap()
        .collect()
        .await;
    let identifier: PluginUniqueIdentifier = events
        .last()
        .and_then(|e| e.plugin_unique_identifier.clone())
        .unwrap()
        .parse()
        .unwrap();

    let installed = orchestrator
        .install_from_identifier("tenant-b", &identifier)
        .await
        .unwrap();
    assert_eq!(installed.installation.tenant_id, "tenant-b");
    assert_eq!(installed.plugin.declaration.name, "demo");
    assert_eq!(
        database.plugins().list_installations("tenant-b").await.unwrap().len(),
        1
    );

    database.close().await;
}
