//! Trust policy: which public keys may vouch for a package
//!
//! The trust set is ordered. Position 0 is the built-in authority key that
//! ships inside the binary; operator-configured keys follow in the order they
//! were listed. Any single match is sufficient.

use rsa::RsaPublicKey;
use sdk::errors::PluginError;
use std::path::PathBuf;
use tracing::info;

use crate::keys::{load_public_key, load_public_key_file};
use crate::TrustTier;

/// Built-in authority key, embedded at compile time
const OFFICIAL_PUBLIC_KEY_PEM: &str = include_str!("../keys/official_public_key.pem");

/// Environment switch for operator-configured keys
pub const ENV_ENABLE_THIRD_PARTY: &str = "ENABLE_THIRD_PARTY_SIGNATURE_VERIFICATION";

/// Environment list of operator-configured key files
pub const ENV_THIRD_PARTY_KEYS: &str = "THIRD_PARTY_SIGNATURE_VERIFICATION_PUBLIC_KEYS";

/// Parse the built-in authority key
pub fn official_public_key() -> Result<RsaPublicKey, PluginError> {
    load_public_key(OFFICIAL_PUBLIC_KEY_PEM.as_bytes())
}

/// Operator trust configuration
///
/// Filled in by the engine configuration from the variables named by
/// [`ENV_ENABLE_THIRD_PARTY`] and [`ENV_THIRD_PARTY_KEYS`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustConfig {
    /// Whether configured third-party keys join the trust set at all
    pub enable_third_party: bool,
    /// Public key files, in verification order after the built-in key
    pub third_party_public_keys: Vec<PathBuf>,
}

/// Split a comma-separated key path list, trimming each item
pub fn parse_key_list(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Ordered, non-empty set of trusted public keys
#[derive(Debug, Clone)]
pub struct TrustKeySet {
    keys: Vec<RsaPublicKey>,
    /// Whether position 0 is the built-in authority
    official: bool,
}

impl TrustKeySet {
    /// Trust set containing only the built-in authority key
    pub fn official() -> Result<Self, PluginError> {
        Ok(Self {
            keys: vec![official_public_key()?],
            official: true,
        })
    }

    /// Built-in key followed by every configured key
    ///
    /// Third-party keys are only loaded when enabled. Any unreadable or
    /// malformed key file fails the whole construction.
    pub fn from_config(config: &TrustConfig) -> Result<Self, PluginError> {
        let set = Self::official()?;
        if !config.enable_third_party {
            return Ok(set);
        }
        set.with_third_party(&config.third_party_public_keys)
    }

    /// Append key files after the keys already in the set, in order
    pub fn with_third_party(mut self, paths: &[PathBuf]) -> Result<Self, PluginError> {
        for path in paths {
            let key = load_public_key_file(path).map_err(|e| match e {
                PluginError::Io(err) => PluginError::Key(format!(
                    "Failed to read public key {}: {}",
                    path.display(),
                    err
                )),
                other => other,
            })?;
            self.keys.push(key);
        }
        info!(
            "Loaded {} third-party signature verification key(s)",
            paths.len()
        );
        Ok(self)
    }

    /// Trust set made of exactly the given keys, no built-in authority
    pub fn from_keys(keys: Vec<RsaPublicKey>) -> Result<Self, PluginError> {
        if keys.is_empty() {
            return Err(PluginError::Key("Trust key set is empty".to_string()));
        }
        Ok(Self {
            keys,
            official: false,
        })
    }

    pub fn keys(&self) -> &[RsaPublicKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Tier of the key at `index`
    pub fn tier(&self, index: usize) -> TrustTier {
        if self.official && index == 0 {
            TrustTier::Official
        } else {
            TrustTier::ThirdParty(index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_official_key_parses() {
        let set = TrustKeySet::official().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.tier(0), TrustTier::Official);
    }

    #[test]
    fn test_parse_key_list() {
        assert_eq!(
            parse_key_list(" /a.pem , /b.pem,, "),
            vec![PathBuf::from("/a.pem"), PathBuf::from("/b.pem")]
        );
        assert!(parse_key_list(" , ").is_empty());
    }

    #[test]
    fn test_disabled_third_party_keys_are_ignored() {
        let config = TrustConfig {
            enable_third_party: false,
            third_party_public_keys: vec![PathBuf::from("/does/not/exist.pem")],
        };
        let set = TrustKeySet::from_config(&config).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_enabled_third_party_keys_appended_in_order() {
        let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let config = TrustConfig {
            enable_third_party: true,
            third_party_public_keys: vec![
                fixtures.join("alice.public.pem"),
                fixtures.join("bob.public.pem"),
            ],
        };
        let set = TrustKeySet::from_config(&config).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.tier(2), TrustTier::ThirdParty(2));

        let bob = load_public_key_file(&fixtures.join("bob.public.pem")).unwrap();
        assert_eq!(set.keys()[2], bob);
    }

    #[test]
    fn test_missing_key_file_fails_fast() {
        let config = TrustConfig {
            enable_third_party: true,
            third_party_public_keys: vec![PathBuf::from("/does/not/exist.pem")],
        };
        assert!(matches!(
            TrustKeySet::from_config(&config),
            Err(PluginError::Key(_))
        ));
    }

    #[test]
    fn test_from_keys_rejects_empty() {
        assert!(TrustKeySet::from_keys(Vec::new()).is_err());
    }
}
