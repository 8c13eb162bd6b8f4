//! Plugin declaration and unique identifier types
//!
//! The declaration is read from `manifest.yaml` at the package root. The
//! unique identifier pins one exact build of a plugin:
//! `author/name:version@checksum`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::errors::PluginError;

/// File name of the declaration at the package root
pub const MANIFEST_FILE: &str = "manifest.yaml";

static IDENTIFIER_PATTERN: OnceLock<Regex> = OnceLock::new();
static NAME_PATTERN: OnceLock<Regex> = OnceLock::new();
static VERSION_PATTERN: OnceLock<Regex> = OnceLock::new();

fn identifier_pattern() -> &'static Regex {
    IDENTIFIER_PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:([a-z0-9_-]{1,64})/)?([a-z0-9_-]{1,255}):([0-9]{1,4}\.[0-9]{1,4}\.[0-9]{1,4})@([a-f0-9]{32,64})$",
        )
        .expect("Invalid identifier pattern")
    })
}

fn name_pattern() -> &'static Regex {
    NAME_PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9_-]{1,128}$").expect("Invalid name pattern"))
}

fn version_pattern() -> &'static Regex {
    VERSION_PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9]{1,4}\.[0-9]{1,4}\.[0-9]{1,4}$").expect("Invalid version pattern")
    })
}

/// Plugin declaration parsed from `manifest.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDeclaration {
    pub name: String,
    pub version: String,
    pub author: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PluginDeclaration {
    /// Parse and validate a declaration from YAML bytes
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, PluginError> {
        let declaration: PluginDeclaration = serde_yaml::from_slice(bytes)
            .map_err(|e| PluginError::Format(format!("Invalid {}: {}", MANIFEST_FILE, e)))?;
        declaration.validate()?;
        Ok(declaration)
    }

    /// Check name, author and version against the identifier grammar
    pub fn validate(&self) -> Result<(), PluginError> {
        if !name_pattern().is_match(&self.name) {
            return Err(PluginError::Format(format!(
                "Invalid plugin name '{}'",
                self.name
            )));
        }
        if !name_pattern().is_match(&self.author) {
            return Err(PluginError::Format(format!(
                "Invalid plugin author '{}'",
                self.author
            )));
        }
        if !version_pattern().is_match(&self.version) {
            return Err(PluginError::Format(format!(
                "Invalid plugin version '{}'",
                self.version
            )));
        }
        Ok(())
    }

    /// Build the unique identifier for this declaration and a package checksum
    pub fn unique_identifier(&self, checksum: &str) -> Result<PluginUniqueIdentifier, PluginError> {
        format!(
            "{}/{}:{}@{}",
            self.author, self.name, self.version, checksum
        )
        .parse()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Identifier of one exact plugin build: `author/name:version@checksum`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginUniqueIdentifier(String);

impl PluginUniqueIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segment(&self, index: usize) -> &str {
        identifier_pattern()
            .captures(&self.0)
            .and_then(|c| c.get(index))
            .map_or("", |m| m.as_str())
    }

    /// Author segment, empty when the identifier has none
    pub fn author(&self) -> &str {
        self.segment(1)
    }

    pub fn name(&self) -> &str {
        self.segment(2)
    }

    pub fn version(&self) -> &str {
        self.segment(3)
    }

    pub fn checksum(&self) -> &str {
        self.segment(4)
    }

    /// Identifier without the checksum: `author/name`
    pub fn plugin_id(&self) -> String {
        match self.author() {
            "" => self.name().to_string(),
            author => format!("{}/{}", author, self.name()),
        }
    }
}

impl FromStr for PluginUniqueIdentifier {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if identifier_pattern().is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(PluginError::Format(format!(
                "Invalid plugin unique identifier '{}'",
                s
            )))
        }
    }
}

impl TryFrom<String> for PluginUniqueIdentifier {
    type Error = PluginError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PluginUniqueIdentifier> for String {
    fn from(value: PluginUniqueIdentifier) -> Self {
        value.0
    }
}

impl fmt::Display for PluginUniqueIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
