//! Plugd plugin packager
//!
//! This crate establishes trust in plugin packages. A package is either a
//! zip archive or an extracted directory; both are read through the
//! [`decoder::PackageDecoder`] trait. The contents are reduced to a
//! canonical digest which is signed with an RSA key and verified against an
//! ordered set of trusted public keys.

pub mod decoder;
pub mod digest;
pub mod keys;
pub mod signer;
pub mod trust;
pub mod verifier;

pub use decoder::{open_package, ArchiveDecoder, DirectoryDecoder, PackageDecoder, PackageHandle};
pub use signer::{sign_plugin, TimestampPolicy};
pub use trust::{TrustConfig, TrustKeySet};
pub use verifier::{verify_plugin, verify_plugin_with_key, verify_plugin_with_keys};

/// Which authority vouched for a verified package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustTier {
    /// Signed by the built-in authority key
    Official,
    /// Signed by an operator-configured key (index into the trust set)
    ThirdParty(usize),
}
