//! Canonical digest: the exact byte sequence that is signed and verified
//!
//! `sha256(entry_1) || sha256(entry_2) || ... || ascii(create_time)`
//!
//! Entries are taken in walk order (sorted relative path). The creation time
//! is appended as its ASCII decimal text, not as a binary integer.

use sdk::errors::PluginError;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::decoder::PackageDecoder;

/// Width of one per-entry hash in the digest
pub const ENTRY_HASH_LEN: usize = 32;

/// Build the canonical digest of a package
pub fn canonical_digest(decoder: &dyn PackageDecoder) -> Result<Vec<u8>, PluginError> {
    let mut data = Vec::new();

    decoder.walk(&mut |path, _dir| {
        let contents = decoder.read_file(path)?;
        let hash = Sha256::digest(&contents);
        debug!("  {} {}", hex::encode(hash), path);
        data.extend_from_slice(&hash);
        Ok(())
    })?;

    let created_at = decoder.create_time()?;
    data.extend_from_slice(created_at.to_string().as_bytes());

    Ok(data)
}

/// SHA-256 of `data`, hex encoded
pub fn compute_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
