//! Plugin verification: canonical digest + RSA signature checks
//!
//! Keys are tried in trust-set order and the first match wins. When no key
//! matches, only the error from the last key tried is reported.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use sdk::errors::PluginError;
use tracing::{debug, info, warn};

use crate::decoder::PackageDecoder;
use crate::digest::canonical_digest;
use crate::keys::verify_digest;
use crate::trust::{TrustConfig, TrustKeySet};
use crate::TrustTier;

/// Verify against the built-in key plus any configured third-party keys
///
/// Key loading happens before any signature check, so a broken key file
/// fails with `Key` even for a correctly signed package.
pub fn verify_plugin(
    decoder: &dyn PackageDecoder,
    config: &TrustConfig,
) -> Result<TrustTier, PluginError> {
    let keys = TrustKeySet::from_config(config)?;
    verify_plugin_with_keys(decoder, &keys)
}

/// Verify against exactly one public key
pub fn verify_plugin_with_key(
    decoder: &dyn PackageDecoder,
    key: &RsaPublicKey,
) -> Result<(), PluginError> {
    let keys = TrustKeySet::from_keys(vec![key.clone()])?;
    verify_plugin_with_keys(decoder, &keys).map(|_| ())
}

/// Verify against an ordered trust set (OR-trust)
pub fn verify_plugin_with_keys(
    decoder: &dyn PackageDecoder,
    keys: &TrustKeySet,
) -> Result<TrustTier, PluginError> {
    let data = canonical_digest(decoder)?;

    let signature = decoder.signature()?;
    let signature = STANDARD
        .decode(signature.trim())
        .map_err(|e| PluginError::Format(format!("Invalid signature encoding: {}", e)))?;

    let mut last_err = None;
    for (index, key) in keys.keys().iter().enumerate() {
        match verify_digest(key, &data, &signature) {
            Ok(()) => {
                let tier = keys.tier(index);
                info!("Plugin signature verified ({:?})", tier);
                return Ok(tier);
            }
            Err(e) => {
                debug!("Trust key #{} did not match: {}", index, e);
                last_err = Some(describe_failure(index, key, e));
            }
        }
    }

    let err = last_err
        .unwrap_or_else(|| PluginError::Verification("Trust key set is empty".to_string()));
    warn!("Plugin signature verification failed: {}", err);
    Err(err)
}

/// Tag a key's failure with its trust-set position and modulus size
fn describe_failure(index: usize, key: &RsaPublicKey, err: PluginError) -> PluginError {
    match err {
        PluginError::Verification(cause) => PluginError::Verification(format!(
            "trust key #{} ({}-bit): {}",
            index,
            key.size() * 8,
            cause
        )),
        other => other,
    }
}
