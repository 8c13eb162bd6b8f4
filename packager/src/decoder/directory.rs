//! Extracted directory decoder
//!
//! Signature metadata lives in a `.signature.json` sidecar at the package
//! root. The sidecar is not part of the package contents and is never
//! enumerated. A directory without a sidecar has no signature and a creation
//! time of `0`.

use sdk::errors::PluginError;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

use super::{parent_dir, PackageDecoder, SignatureMeta, SIGNATURE_SIDECAR};

/// Decoder over a package extracted on the local filesystem
#[derive(Debug)]
pub struct DirectoryDecoder {
    root: PathBuf,
    closed: AtomicBool,
}

impl DirectoryDecoder {
    /// Bind to a directory; fails with `Format` if `root` is not a directory
    pub fn open(root: impl AsRef<Path>) -> Result<Self, PluginError> {
        let root = root.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&root)?;
        if !metadata.is_dir() {
            return Err(PluginError::Format(format!(
                "Not a directory: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the signature sidecar
    pub fn sidecar_path(&self) -> PathBuf {
        self.root.join(SIGNATURE_SIDECAR)
    }

    fn ensure_open(&self) -> Result<(), PluginError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::other("package is closed").into());
        }
        Ok(())
    }

    fn meta(&self) -> Result<Option<SignatureMeta>, PluginError> {
        match std::fs::read(self.sidecar_path()) {
            Ok(bytes) => SignatureMeta::parse(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Sorted relative paths of every regular file
    fn collect_entries(&self) -> Result<Vec<String>, PluginError> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| {
                PluginError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| io::Error::other("filesystem loop detected")),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| PluginError::Format(e.to_string()))?;
            let mut parts = Vec::new();
            for component in relative.components() {
                let part = component.as_os_str().to_str().ok_or_else(|| {
                    PluginError::Format(format!(
                        "Non UTF-8 path in package: {}",
                        relative.display()
                    ))
                })?;
                parts.push(part);
            }
            let relative = parts.join("/");

            if relative == SIGNATURE_SIDECAR {
                continue;
            }
            entries.push(relative);
        }
        entries.sort();
        Ok(entries)
    }

    /// Resolve a relative entry path, refusing anything outside the root
    fn resolve(&self, path: &str) -> Result<PathBuf, PluginError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || path.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid entry path: {}", path),
            )
            .into());
        }
        Ok(self.root.join(relative))
    }
}

impl PackageDecoder for DirectoryDecoder {
    fn walk(
        &self,
        visit: &mut dyn FnMut(&str, &str) -> Result<(), PluginError>,
    ) -> Result<(), PluginError> {
        self.ensure_open()?;
        for entry in self.collect_entries()? {
            visit(&entry, parent_dir(&entry))?;
        }
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, PluginError> {
        self.ensure_open()?;
        let full = self.resolve(path)?;
        Ok(std::fs::read(full)?)
    }

    fn signature(&self) -> Result<String, PluginError> {
        self.ensure_open()?;
        self.meta()?
            .map(|m| m.signature)
            .ok_or_else(|| PluginError::Format("Package carries no signature".to_string()))
    }

    fn create_time(&self) -> Result<i64, PluginError> {
        self.ensure_open()?;
        Ok(self.meta()?.map_or(0, |m| m.time))
    }

    fn close(&self) -> Result<(), PluginError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
