//! Zip archive decoder
//!
//! Signature metadata is stored as JSON in the archive comment, which leaves
//! every file entry untouched when a package is (re-)signed.

use sdk::errors::PluginError;
use std::collections::HashSet;
use std::io::{self, Cursor, Read, Write};
use std::sync::Mutex;
use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{parent_dir, PackageDecoder, SignatureMeta};

type Archive = ZipArchive<Cursor<Vec<u8>>>;

/// Default cap on the total uncompressed size of an archive (512 MiB)
pub const DEFAULT_MAX_UNPACKED_SIZE: u64 = 512 * 1024 * 1024;

/// Decoder over an in-memory zip archive
pub struct ArchiveDecoder {
    /// `None` once closed
    archive: Mutex<Option<Archive>>,
    /// Regular file entries, sorted
    entries: Vec<String>,
    meta: Option<SignatureMeta>,
}

impl ArchiveDecoder {
    /// Bind to archive bytes with the default unpacked size limit
    pub fn open(bytes: Vec<u8>) -> Result<Self, PluginError> {
        Self::open_with_limit(bytes, DEFAULT_MAX_UNPACKED_SIZE)
    }

    /// Bind to archive bytes
    ///
    /// Fails with `Format` when the bytes are not a zip archive, contain an
    /// entry escaping the package root, contain duplicate entries, carry an
    /// unparsable comment, or declare more than `max_unpacked_size` bytes of
    /// uncompressed content in total.
    pub fn open_with_limit(bytes: Vec<u8>, max_unpacked_size: u64) -> Result<Self, PluginError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(format_error)?;

        let mut entries = Vec::with_capacity(archive.len());
        let mut seen = HashSet::new();
        let mut unpacked: u64 = 0;
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index).map_err(format_error)?;
            if file.is_dir() {
                continue;
            }
            if file.enclosed_name().is_none() {
                return Err(PluginError::Format(format!(
                    "Unsafe entry path in archive: {}",
                    file.name()
                )));
            }
            let name = file.name().to_string();
            if !seen.insert(name.clone()) {
                return Err(PluginError::Format(format!(
                    "Duplicate entry in archive: {}",
                    name
                )));
            }
            unpacked = unpacked.saturating_add(file.size());
            if unpacked > max_unpacked_size {
                return Err(PluginError::Format(format!(
                    "Archive unpacks to more than {} bytes",
                    max_unpacked_size
                )));
            }
            entries.push(name);
        }
        entries.sort();

        let meta = SignatureMeta::parse(archive.comment())?;
        debug!("Opened archive with {} entries", entries.len());

        Ok(Self {
            archive: Mutex::new(Some(archive)),
            entries,
            meta,
        })
    }

    fn meta(&self) -> Result<&SignatureMeta, PluginError> {
        self.meta
            .as_ref()
            .ok_or_else(|| PluginError::Format("Package carries no signature".to_string()))
    }
}

impl PackageDecoder for ArchiveDecoder {
    fn walk(
        &self,
        visit: &mut dyn FnMut(&str, &str) -> Result<(), PluginError>,
    ) -> Result<(), PluginError> {
        for entry in &self.entries {
            visit(entry, parent_dir(entry))?;
        }
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, PluginError> {
        let mut guard = self
            .archive
            .lock()
            .map_err(|_| io::Error::other("archive lock poisoned"))?;
        let archive = guard
            .as_mut()
            .ok_or_else(|| io::Error::other("package is closed"))?;

        let mut file = archive.by_name(path).map_err(|e| match e {
            ZipError::FileNotFound => PluginError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found in package", path),
            )),
            ZipError::Io(err) => PluginError::Io(err),
            other => PluginError::Io(io::Error::other(other.to_string())),
        })?;

        // The declared size was checked against the limit on open; reading
        // past it means the header lied.
        let declared = file.size();
        let mut buf = Vec::new();
        file.by_ref()
            .take(declared.saturating_add(1))
            .read_to_end(&mut buf)?;
        if buf.len() as u64 > declared {
            return Err(PluginError::Format(format!(
                "Entry {} is larger than its declared size",
                path
            )));
        }
        Ok(buf)
    }

    fn signature(&self) -> Result<String, PluginError> {
        Ok(self.meta()?.signature.clone())
    }

    fn create_time(&self) -> Result<i64, PluginError> {
        Ok(self.meta.as_ref().map_or(0, |m| m.time))
    }

    fn close(&self) -> Result<(), PluginError> {
        let mut guard = self
            .archive
            .lock()
            .map_err(|_| io::Error::other("archive lock poisoned"))?;
        if guard.take().is_some() {
            debug!("Closed archive package");
        }
        Ok(())
    }
}

/// Copy an archive, replacing its comment with `meta`
///
/// Entries are raw-copied, so their compressed bytes are not touched.
pub fn with_signature(bytes: &[u8], meta: &SignatureMeta) -> Result<Vec<u8>, PluginError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(format_error)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(bytes.len())));

    for index in 0..archive.len() {
        let file = archive.by_index_raw(index).map_err(format_error)?;
        writer.raw_copy_file(file).map_err(format_error)?;
    }
    writer.set_comment(meta.to_json()?);

    let cursor = writer.finish().map_err(format_error)?;
    Ok(cursor.into_inner())
}

/// Build an archive from `(path, contents)` pairs, in the given physical order
pub fn write_archive(
    files: &[(&str, &[u8])],
    meta: Option<&SignatureMeta>,
) -> Result<Vec<u8>, PluginError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, contents) in files {
        writer.start_file(*path, options).map_err(format_error)?;
        writer.write_all(contents)?;
    }
    if let Some(meta) = meta {
        writer.set_comment(meta.to_json()?);
    }

    let cursor = writer.finish().map_err(format_error)?;
    Ok(cursor.into_inner())
}

fn format_error(e: ZipError) -> PluginError {
    match e {
        ZipError::Io(err) => PluginError::Io(err),
        other => PluginError::Format(other.to_string()),
    }
}
