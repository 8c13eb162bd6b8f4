//! Package signing (authoring side)
//!
//! Signing builds the canonical digest with the same code the verifier
//! uses, signs it, and embeds `{signature, time}` into the package. The
//! original package is replaced atomically, so a failure never leaves a
//! half-written package behind.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::RsaPrivateKey;
use sdk::errors::PluginError;
use std::path::Path;
use tracing::info;

use crate::decoder::archive::with_signature;
use crate::decoder::{ArchiveDecoder, DirectoryDecoder, PackageDecoder, SignatureMeta};
use crate::digest::canonical_digest;
use crate::keys::{load_private_key_file, sign_digest, stage};

/// Which creation time a new signature carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// Always stamp the current time
    #[default]
    Refresh,
    /// Keep the embedded time when the package already has one
    Reuse,
}

impl TimestampPolicy {
    fn resolve(self, existing: i64) -> i64 {
        match self {
            Self::Reuse if existing != 0 => existing,
            _ => chrono::Utc::now().timestamp(),
        }
    }
}

/// Presents a package with a different creation time
struct WithCreateTime<'a> {
    inner: &'a dyn PackageDecoder,
    created_at: i64,
}

impl PackageDecoder for WithCreateTime<'_> {
    fn walk(
        &self,
        visit: &mut dyn FnMut(&str, &str) -> Result<(), PluginError>,
    ) -> Result<(), PluginError> {
        self.inner.walk(visit)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, PluginError> {
        self.inner.read_file(path)
    }

    fn signature(&self) -> Result<String, PluginError> {
        self.inner.signature()
    }

    fn create_time(&self) -> Result<i64, PluginError> {
        Ok(self.created_at)
    }

    fn close(&self) -> Result<(), PluginError> {
        self.inner.close()
    }
}

/// Sign any package decoder's contents as of `created_at`
pub fn sign_decoder(
    decoder: &dyn PackageDecoder,
    key: &RsaPrivateKey,
    created_at: i64,
) -> Result<SignatureMeta, PluginError> {
    let data = canonical_digest(&WithCreateTime {
        inner: decoder,
        created_at,
    })?;
    let signature = sign_digest(key, &data)?;
    Ok(SignatureMeta {
        signature: STANDARD.encode(signature),
        time: created_at,
    })
}

/// Sign archive bytes, returning the signed archive
pub fn sign_archive_bytes(
    bytes: &[u8],
    key: &RsaPrivateKey,
    policy: TimestampPolicy,
) -> Result<Vec<u8>, PluginError> {
    let decoder = ArchiveDecoder::open(bytes.to_vec())?;
    let created_at = policy.resolve(decoder.create_time()?);
    let meta = sign_decoder(&decoder, key, created_at);
    decoder.close()?;
    with_signature(bytes, &meta?)
}

/// Sign the package at `package_path` in place
///
/// Archives get their comment rewritten; directories get a fresh sidecar.
pub fn sign_plugin(
    package_path: &Path,
    private_key_path: &Path,
    policy: TimestampPolicy,
) -> Result<(), PluginError> {
    let key = load_private_key_file(private_key_path)?;

    if std::fs::metadata(package_path)?.is_dir() {
        let decoder = DirectoryDecoder::open(package_path)?;
        let created_at = policy.resolve(decoder.create_time()?);
        let meta = sign_decoder(&decoder, &key, created_at)?;
        replace_file(&decoder.sidecar_path(), meta.to_json()?.as_bytes())?;
        decoder.close()?;
    } else {
        let bytes = std::fs::read(package_path)?;
        let signed = sign_archive_bytes(&bytes, &key, policy)?;
        replace_file(package_path, &signed)?;
    }

    info!("Plugin signed: {}", package_path.display());
    Ok(())
}

/// Write `contents` beside `target` and rename over it
fn replace_file(target: &Path, contents: &[u8]) -> Result<(), PluginError> {
    let tmp = stage(target, contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| PluginError::Io(e.error))?;
    Ok(())
}
