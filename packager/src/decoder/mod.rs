//! Package decoding
//!
//! A plugin package is presented either as a zip archive or as an extracted
//! directory. Both are read through [`PackageDecoder`], and callers never
//! depend on the concrete variant.
//!
//! Entries are always enumerated sorted by relative path, never in the
//! physical order of the archive, so the canonical digest is the same for
//! both variants given the same contents.

use sdk::errors::PluginError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub mod archive;
pub mod directory;

pub use archive::ArchiveDecoder;
pub use directory::DirectoryDecoder;

/// Name of the signature sidecar at the root of a directory package
pub const SIGNATURE_SIDECAR: &str = ".signature.json";

/// Signature metadata embedded in a package
///
/// Stored as JSON in the zip archive comment, or in the sidecar file of a
/// directory package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureMeta {
    /// Base64 signature over the canonical digest
    pub signature: String,
    /// Creation time in epoch seconds
    pub time: i64,
}

impl SignatureMeta {
    /// Parse metadata, `None` when the bytes carry no metadata at all
    pub(crate) fn parse(bytes: &[u8]) -> Result<Option<Self>, PluginError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(bytes)
            .map(Some)
            .map_err(|e| PluginError::Format(format!("Invalid signature metadata: {}", e)))
    }

    pub(crate) fn to_json(&self) -> Result<String, PluginError> {
        serde_json::to_string(self)
            .map_err(|e| PluginError::Format(format!("Failed to encode signature metadata: {}", e)))
    }
}

/// Read-only view over one plugin package
pub trait PackageDecoder: Send + Sync {
    /// Visit every regular file exactly once, sorted by relative path
    ///
    /// The visitor receives the path relative to the package root (using `/`
    /// separators) and the name of its parent directory (empty at the root).
    fn walk(
        &self,
        visit: &mut dyn FnMut(&str, &str) -> Result<(), PluginError>,
    ) -> Result<(), PluginError>;

    /// Raw bytes of one entry
    fn read_file(&self, path: &str) -> Result<Vec<u8>, PluginError>;

    /// Embedded base64 signature
    fn signature(&self) -> Result<String, PluginError>;

    /// Embedded creation time in epoch seconds, `0` when unset
    fn create_time(&self) -> Result<i64, PluginError>;

    /// Release backend resources; idempotent
    fn close(&self) -> Result<(), PluginError>;

    /// All entry paths in walk order
    fn entries(&self) -> Result<Vec<String>, PluginError> {
        let mut entries = Vec::new();
        self.walk(&mut |path, _dir| {
            entries.push(path.to_string());
            Ok(())
        })?;
        Ok(entries)
    }
}

/// Owning, scoped binding to one opened package
///
/// The decoder is closed exactly once: either by [`PackageHandle::release`]
/// or when the handle is dropped. Clones handed out by [`PackageHandle::shared`]
/// do not keep the package open; reads through them fail once it is closed.
pub struct PackageHandle {
    decoder: Arc<dyn PackageDecoder>,
    released: bool,
}

impl PackageHandle {
    pub fn new(decoder: impl PackageDecoder + 'static) -> Self {
        Self::from_boxed(Box::new(decoder))
    }

    pub fn from_boxed(decoder: Box<dyn PackageDecoder>) -> Self {
        Self {
            decoder: Arc::from(decoder),
            released: false,
        }
    }

    pub fn decoder(&self) -> &dyn PackageDecoder {
        self.decoder.as_ref()
    }

    /// Decoder reference that can move onto a blocking thread
    pub fn shared(&self) -> Arc<dyn PackageDecoder> {
        Arc::clone(&self.decoder)
    }

    /// Close the underlying decoder
    pub fn release(mut self) -> Result<(), PluginError> {
        self.released = true;
        self.decoder.close()
    }
}

impl std::ops::Deref for PackageHandle {
    type Target = dyn PackageDecoder;

    fn deref(&self) -> &Self::Target {
        self.decoder.as_ref()
    }
}

impl Drop for PackageHandle {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.decoder.close() {
                debug!("Failed to close package: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for PackageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageHandle")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// Open a package from disk: directories use [`DirectoryDecoder`], files [`ArchiveDecoder`]
pub fn open_package(path: &Path) -> Result<PackageHandle, PluginError> {
    let metadata = std::fs::metadata(path)?;
    if metadata.is_dir() {
        Ok(PackageHandle::new(DirectoryDecoder::open(path)?))
    } else {
        let bytes = std::fs::read(path)?;
        Ok(PackageHandle::new(ArchiveDecoder::open(bytes)?))
    }
}

/// Parent directory name of a `/`-separated relative path
pub(crate) fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDecoder {
        closes: Arc<AtomicUsize>,
    }

    impl PackageDecoder for CountingDecoder {
        fn walk(
            &self,
            _visit: &mut dyn FnMut(&str, &str) -> Result<(), PluginError>,
        ) -> Result<(), PluginError> {
            Ok(())
        }
        fn read_file(&self, path: &str) -> Result<Vec<u8>, PluginError> {
            Err(PluginError::Format(path.to_string()))
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

    #[test]
    fn test_handle_closes_once_on_release() {
        let closes = Arc::new(AtomicUsize::new(0));
        let handle = PackageHandle::new(CountingDecoder {
            closes: Arc::clone(&closes),
        });
        handle.release().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_closes_once_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let _handle = PackageHandle::new(CountingDecoder {
                closes: Arc::clone(&closes),
            });
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shared_decoder_does_not_delay_close() {
        let closes = Arc::new(AtomicUsize::new(0));
        let handle = PackageHandle::new(CountingDecoder {
            closes: Arc::clone(&closes),
        });
        let shared = handle.shared();
        handle.release().unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        drop(shared);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("main.src"), "");
        assert_eq!(parent_dir("a/b/c.txt"), "a/b");
    }

    #[test]
    fn test_signature_meta_parse() {
        assert_eq!(SignatureMeta::parse(b"").unwrap(), None);
        let meta = SignatureMeta::parse(br#"{"signature":"abc","time":1700000000}"#)
            .unwrap()
            .unwrap();
        assert_eq!(meta.time, 1700000000);
        assert!(SignatureMeta::parse(b"not json").is_err());
    }
}
