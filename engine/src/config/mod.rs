//! Configuration management
//!
//! Configuration is read from an optional TOML file and then overridden by
//! environment variables. Without a file, built-in defaults are used.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **signature**: Third-party trust keys and install-time verification policy
//! - **install**: Timeout, event buffer and package size limits
//! - **server**: HTTP listen address
//!
//! # Environment Overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `ENABLE_THIRD_PARTY_SIGNATURE_VERIFICATION` | `signature.enable_third_party` |
//! | `THIRD_PARTY_SIGNATURE_VERIFICATION_PUBLIC_KEYS` | `signature.third_party_public_keys` |
//! | `FORCE_VERIFYING_SIGNATURE` | `signature.force_verify` |
//! | `PLUGD_DATA_DIR` | `core.data_dir` |
//! | `PLUGD_LOG_LEVEL` | `core.log_level` |
//! | `PLUGD_LISTEN_ADDR` | `server.listen_addr` |
//!
//! # Examples
//!
//! ```no_run
//! use plugd_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let keys = config.trust_key_set()?;
//! println!("{} trusted key(s)", keys.len());
//! # Ok(())
//! # }
//! ```

use packager::decoder::archive::DEFAULT_MAX_UNPACKED_SIZE;
use packager::trust::{parse_key_list, ENV_ENABLE_THIRD_PARTY, ENV_THIRD_PARTY_KEYS};
use packager::{TrustConfig, TrustKeySet};
use sdk::errors::PluginError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const ENV_FORCE_VERIFY: &str = "FORCE_VERIFYING_SIGNATURE";
pub const ENV_DATA_DIR: &str = "PLUGD_DATA_DIR";
pub const ENV_LOG_LEVEL: &str = "PLUGD_LOG_LEVEL";
pub const ENV_LISTEN_ADDR: &str = "PLUGD_LISTEN_ADDR";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub signature: SignatureConfig,

    #[serde(default)]
    pub install: InstallConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Signature trust configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Add `third_party_public_keys` to the trust set
    #[serde(default)]
    pub enable_third_party: bool,

    /// Public key files, appended after the built-in key in this order
    #[serde(default)]
    pub third_party_public_keys: Vec<PathBuf>,

    /// Verify uploaded packages before installing them
    #[serde(default = "default_true")]
    pub force_verify: bool,
}

/// Install pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Overall deadline for one install stream (seconds)
    #[serde(default = "default_install_timeout")]
    pub timeout_secs: u64,

    /// Install events buffered between worker and consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Largest accepted package upload (bytes)
    #[serde(default = "default_max_package_size")]
    pub max_package_size: usize,

    /// Largest total uncompressed content of one package (bytes)
    #[serde(default = "default_max_unpacked_size")]
    pub max_unpacked_size: u64,
}

/// HTTP service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.plugd")
}

fn default_install_timeout() -> u64 {
    3600
}

fn default_channel_capacity() -> usize {
    32
}

fn default_max_package_size() -> usize {
    50 * 1024 * 1024
}

fn default_max_unpacked_size() -> u64 {
    DEFAULT_MAX_UNPACKED_SIZE
}

fn default_listen_addr() -> String {
    "127.0.0.1:5002".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            enable_third_party: false,
            third_party_public_keys: Vec::new(),
            force_verify: true,
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_install_timeout(),
            channel_capacity: default_channel_capacity(),
            max_package_size: default_max_package_size(),
            max_unpacked_size: default_max_unpacked_size(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Config {
    /// Load configuration using the process environment
    ///
    /// `path` wins over `~/.plugd/config.toml`; when neither exists the
    /// defaults are used. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, PluginError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, PluginError> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => match Self::default_config_path() {
                Some(path) if path.exists() => Self::read_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env_with(lookup);
        config.validate_and_process()?;
        Ok(config)
    }

    /// Load a configuration file, validated, without environment overrides
    pub fn load_from_path(path: &Path) -> Result<Self, PluginError> {
        let mut config = Self::read_file(path)?;
        config.validate_and_process()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, PluginError> {
        debug!("Reading config file: {}", path.display());
        let contents = fs::read_to_string(path)
            .map_err(|e| PluginError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| PluginError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default configuration file path (~/.plugd/config.toml)
    fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".plugd").join("config.toml"))
    }

    /// Apply environment overrides
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_ENABLE_THIRD_PARTY) {
            self.signature.enable_third_party = parse_bool(&value);
        }
        if let Some(value) = lookup(ENV_THIRD_PARTY_KEYS) {
            self.signature.third_party_public_keys = parse_key_list(&value);
        }
        if let Some(value) = lookup(ENV_FORCE_VERIFY) {
            self.signature.force_verify = parse_bool(&value);
        }
        if let Some(value) = lookup(ENV_DATA_DIR) {
            self.core.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.core.log_level = value.trim().to_lowercase();
        }
        if let Some(value) = lookup(ENV_LISTEN_ADDR) {
            self.server.listen_addr = value.trim().to_string();
        }
    }

    /// Validate fields and expand paths
    fn validate_and_process(&mut self) -> Result<(), PluginError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(PluginError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.install.timeout_secs == 0 {
            return Err(PluginError::Config(
                "install.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.install.channel_capacity == 0 {
            return Err(PluginError::Config(
                "install.channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.install.max_package_size == 0 {
            return Err(PluginError::Config(
                "install.max_package_size must be greater than 0".to_string(),
            ));
        }
        if self.install.max_unpacked_size == 0 {
            return Err(PluginError::Config(
                "install.max_unpacked_size must be greater than 0".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        for key in &mut self.signature.third_party_public_keys {
            *key = expand_path(key)?;
        }

        Ok(())
    }

    /// Trust settings for the verifier
    pub fn trust_config(&self) -> TrustConfig {
        TrustConfig {
            enable_third_party: self.signature.enable_third_party,
            third_party_public_keys: self.signature.third_party_public_keys.clone(),
        }
    }

    /// Build the process-wide trust key set
    ///
    /// Fails on the first unreadable or malformed configured key.
    pub fn trust_key_set(&self) -> Result<Arc<TrustKeySet>, PluginError> {
        TrustKeySet::from_config(&self.trust_config()).map(Arc::new)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install.timeout_secs)
    }

    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("plugd.db")
    }

    /// Directory holding extracted plugins
    pub fn plugins_dir(&self) -> PathBuf {
        self.core.data_dir.join("plugins")
    }

    /// Create the data directory if it doesn't exist
    pub fn ensure_data_dir(&self) -> Result<(), PluginError> {
        fs::create_dir_all(&self.core.data_dir)
            .map_err(|e| PluginError::Config(format!("Failed to create data directory: {}", e)))
    }
}

fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, PluginError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| PluginError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| PluginError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| PluginError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
