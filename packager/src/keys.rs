//! Key material handling: RSA key pairs in PEM form
//!
//! Private keys are written as PKCS#1 PEM (`RSA PRIVATE KEY`), public keys as
//! SubjectPublicKeyInfo PEM (`PUBLIC KEY`). Loading accepts either encoding
//! for both kinds of key.
//!
//! Signatures are RSA PKCS#1 v1.5 over the SHA-256 hash of the signed bytes.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sdk::errors::PluginError;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Default modulus size for generated signing keys
pub const DEFAULT_KEY_BITS: usize = 4096;

/// Default base name for `signature generate`
pub const DEFAULT_KEY_PAIR_NAME: &str = "plugd_plugin_signing_key";

/// An RSA key pair used to sign plugin packages
#[derive(Clone)]
pub struct KeyPair {
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a fresh key pair with a modulus of `bits` bits
    pub fn generate(bits: usize) -> Result<Self, PluginError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| PluginError::Key(format!("Failed to generate key pair: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn private_key_pem(&self) -> Result<String, PluginError> {
        self.private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| PluginError::Key(format!("Failed to encode private key: {}", e)))
    }

    pub fn public_key_pem(&self) -> Result<String, PluginError> {
        encode_public_key(&self.public_key)
    }
}

/// Encode a public key as SubjectPublicKeyInfo PEM
pub fn encode_public_key(key: &RsaPublicKey) -> Result<String, PluginError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| PluginError::Key(format!("Failed to encode public key: {}", e)))
}

/// Parse a PEM-encoded public key
pub fn load_public_key(pem: &[u8]) -> Result<RsaPublicKey, PluginError> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| PluginError::Key("Public key is not valid UTF-8".to_string()))?;

    RsaPublicKey::from_public_key_pem(text)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(text))
        .map_err(|e| PluginError::Key(format!("Failed to parse public key: {}", e)))
}

/// Parse a PEM-encoded private key
pub fn load_private_key(pem: &[u8]) -> Result<RsaPrivateKey, PluginError> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| PluginError::Key("Private key is not valid UTF-8".to_string()))?;

    RsaPrivateKey::from_pkcs1_pem(text)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(text))
        .map_err(|e| PluginError::Key(format!("Failed to parse private key: {}", e)))
}

/// Read and parse a public key file
pub fn load_public_key_file(path: &Path) -> Result<RsaPublicKey, PluginError> {
    let bytes = std::fs::read(path)?;
    load_public_key(&bytes)
}

/// Read and parse a private key file
pub fn load_private_key_file(path: &Path) -> Result<RsaPrivateKey, PluginError> {
    let bytes = std::fs::read(path)?;
    load_private_key(&bytes)
}

/// Sign `data` (SHA-256, PKCS#1 v1.5)
pub fn sign_digest(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, PluginError> {
    let hashed = Sha256::digest(data);
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)
        .map_err(|e| PluginError::Key(format!("Failed to sign: {}", e)))
}

/// Verify a signature over `data` (SHA-256, PKCS#1 v1.5)
pub fn verify_digest(key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result<(), PluginError> {
    let hashed = Sha256::digest(data);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, signature)
        .map_err(|e| PluginError::Verification(e.to_string()))
}

/// Paths of the two artifacts derived from a base name
pub fn key_pair_paths(base_name: &str) -> (PathBuf, PathBuf) {
    (
        PathBuf::from(format!("{}.private.pem", base_name)),
        PathBuf::from(format!("{}.public.pem", base_name)),
    )
}

/// Generate a key pair and persist it as `<base>.private.pem` / `<base>.public.pem`
pub fn generate_key_pair(base_name: &str, bits: usize) -> Result<(PathBuf, PathBuf), PluginError> {
    let pair = KeyPair::generate(bits)?;
    let (private_path, public_path) = key_pair_paths(base_name);
    write_key_pair(&pair, &private_path, &public_path)?;
    info!(
        "Generated key pair: {} / {}",
        private_path.display(),
        public_path.display()
    );
    Ok((private_path, public_path))
}

/// Write both artifacts, or neither
///
/// Both files are staged as temp files in their target directories and then
/// persisted without clobbering existing files. If the second persist fails
/// the first artifact is removed again.
pub fn write_key_pair(
    pair: &KeyPair,
    private_path: &Path,
    public_path: &Path,
) -> Result<(), PluginError> {
    let private_pem = pair.private_key_pem()?;
    let public_pem = pair.public_key_pem()?;

    let private_tmp = stage(private_path, private_pem.as_bytes())?;
    let public_tmp = stage(public_path, public_pem.as_bytes())?;

    private_tmp
        .persist_noclobber(private_path)
        .map_err(|e| PluginError::Io(e.error))?;

    if let Err(e) = public_tmp.persist_noclobber(public_path) {
        debug!("Removing {} after failed write", private_path.display());
        let _ = std::fs::remove_file(private_path);
        return Err(PluginError::Io(e.error));
    }

    Ok(())
}

/// Write `contents` to a temp file beside `target`
pub(crate) fn stage(target: &Path, contents: &[u8]) -> Result<NamedTempFile, PluginError> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    Ok(tmp)
}
