//! Plugin manifest declaration and validation.
//!
//! A manifest is a JSON document listing plugin specs:
//!
//! ```json
//! {
//!   "plugins": [
//!     { "name": "nvim-treesitter", "source": "nvim-treesitter/nvim-treesitter",
//!       "load": "on_file_argument", "build": "make" },
//!     { "name": "telescope", "source": "nvim-telescope/telescope.nvim",
//!       "dependencies": ["plenary"] }
//!   ]
//! }
//! ```

use crate::extension::declaration::{
    is_valid_extension_name, is_valid_source, ExtensionDeclaration, LoadPolicy,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Declarative list of plugins, in load-declaration order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

/// One plugin entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginSpec {
    pub name: String,
    /// Installer source identifier (`owner/repo`, URL or absolute path).
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub load: LoadPolicy,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Shell command run once after install or update.
    #[serde(default)]
    pub build: Option<String>,
    /// Opaque settings handed to the plugin's configure entry point.
    #[serde(default)]
    pub settings: Option<Map<String, Value>>,
}

impl PluginSpec {
    /// Builds a callback-free declaration; callers attach hooks and configure.
    pub fn to_declaration(&self) -> ExtensionDeclaration {
        let declaration = ExtensionDeclaration::new(self.name.trim())
            .dependencies(self.dependencies.iter().cloned())
            .load(self.load);
        match &self.source {
            Some(source) => declaration.source(source.clone()),
            None => declaration,
        }
    }
}

impl PluginManifest {
    /// Validates manifest-level invariants not expressible in serde.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = BTreeSet::new();
        for (index, plugin) in self.plugins.iter().enumerate() {
            let name = plugin.name.trim();
            if name.is_empty() {
                return Err(ManifestError::EmptyName { index });
            }
            if !is_valid_extension_name(name) {
                return Err(ManifestError::InvalidName(plugin.name.clone()));
            }
            if !seen.insert(name) {
                return Err(ManifestError::DuplicateName(name.to_string()));
            }
            if let Some(source) = &plugin.source {
                if !is_valid_source(source) {
                    return Err(ManifestError::InvalidSource {
                        name: name.to_string(),
                        value: source.clone(),
                    });
                }
            }
            if let Some(dependency) = plugin
                .dependencies
                .iter()
                .find(|dependency| !is_valid_extension_name(dependency))
            {
                return Err(ManifestError::InvalidName(dependency.clone()));
            }
            if matches!(&plugin.build, Some(build) if build.trim().is_empty()) {
                return Err(ManifestError::EmptyBuild(name.to_string()));
            }
        }
        Ok(())
    }
}

/// Parses and validates a manifest from JSON text.
pub fn parse_manifest(text: &str) -> Result<PluginManifest, ManifestError> {
    let manifest: PluginManifest = serde_json::from_str(text).map_err(ManifestError::Parse)?;
    manifest.validate()?;
    Ok(manifest)
}

/// Reads, parses and validates a manifest file.
pub fn load_manifest(path: &Path) -> Result<PluginManifest, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_manifest(&text)
}

/// Manifest read/parse/validation errors.
#[derive(Debug)]
pub enum ManifestError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    EmptyName {
        index: usize,
    },
    InvalidName(String),
    InvalidSource {
        name: String,
        value: String,
    },
    DuplicateName(String),
    EmptyBuild(String),
}

impl Display for ManifestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read manifest `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "manifest is not valid: {err}"),
            Self::EmptyName { index } => write!(f, "plugin #{index} has an empty name"),
            Self::InvalidName(value) => write!(f, "plugin name is invalid: `{value}`"),
            Self::InvalidSource { name, value } => {
                write!(f, "plugin `{name}` has an invalid source: `{value}`")
            }
            Self::DuplicateName(value) => write!(f, "plugin is listed twice: {value}"),
            Self::EmptyBuild(value) => write!(f, "plugin `{value}` has an empty build command"),
        }
    }
}

impl Error for ManifestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}
