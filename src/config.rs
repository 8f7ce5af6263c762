//! Configuration management for the contract service
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (contracts.toml)
//! - Environment variables (CONTRACTS__*)
//!
//! ## Example config file (contracts.toml):
//! ```toml
//! [registry]
//! repositories = [
//!     { uri = "https://github.com/acme/message-type-registry.git", type = "GITHUB", parameters = { GITHUB_APP_ID = "1234", GITHUB_PRIVATE_KEY_PEM = "..." } },
//!     { uri = "https://bitbucket.example.com/scm/mt/registry.git", type = "BITBUCKET" },
//! ]
//!
//! [store]
//! state_file = "contracts-state.json"
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Message type registries
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Contract and deployment storage
    #[serde(default)]
    pub store: StoreConfig,
}

/// Known message type registries, keyed by clone URL
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

impl RegistryConfig {
    pub fn repository(&self, uri: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.uri == uri)
    }
}

/// How a registry is hosted, which decides how it authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryType {
    #[default]
    Bitbucket,
    Github,
    Local,
}

/// A single registry
#[derive(Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub uri: String,

    #[serde(rename = "type", default)]
    pub kind: RepositoryType,

    /// Type specific parameters such as app credentials
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.parameters.keys().collect();
        names.sort();
        f.debug_struct("RepositoryConfig")
            .field("uri", &self.uri)
            .field("kind", &self.kind)
            .field("parameters", &names)
            .finish()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot of contracts and deployments
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("contracts-state.json")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl ContractsConfig {
    /// Load configuration, adding a specific file on top of the default locations
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["contracts.toml", ".contracts.toml", "config/contracts.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(dirs) = directories::ProjectDirs::from("ch", "message-contracts", "message-contracts") {
            let xdg_config = dirs.config_dir().join("contracts.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // CONTRACTS__STORE__STATE_FILE=...
        builder = builder.add_source(
            Environment::with_prefix("CONTRACTS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// State file path, resolved against the working directory
    pub fn state_file(&self) -> PathBuf {
        if self.store.state_file.is_absolute() {
            self.store.state_file.clone()
        } else {
            std::env::current_dir().unwrap_or_default().join(&self.store.state_file)
        }
    }
}
