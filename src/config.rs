//! Configuration for descriptor persistence
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (block-meta.toml)
//! - Environment variables (BLOCK_META__*)
//!
//! ## Example config file (block-meta.toml):
//! ```toml
//! [store]
//! filename = "meta.json"
//! temp_suffix = ".tmp"
//! sync_dir = true
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::schema::META_FILENAME;

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Persistence settings
    #[serde(default)]
    pub store: StoreConfig,
}

/// How descriptors are laid out and published in a block directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Name of the canonical descriptor file
    #[serde(default = "default_filename")]
    pub filename: String,

    /// Suffix of temporary files staged next to the descriptor
    #[serde(default = "default_temp_suffix")]
    pub temp_suffix: String,

    /// Fsync the block directory after the rename so the swap itself is durable
    #[serde(default = "default_true")]
    pub sync_dir: bool,
}

/// Length of the random segment in temporary file names
pub const TEMP_RAND_LEN: usize = 6;

fn default_filename() -> String {
    META_FILENAME.to_string()
}

fn default_temp_suffix() -> String {
    ".tmp".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            filename: default_filename(),
            temp_suffix: default_temp_suffix(),
            sync_dir: true,
        }
    }
}

impl StoreConfig {
    /// Prefix shared by all temporary files of this store
    pub fn temp_prefix(&self) -> String {
        format!("{}.", self.filename)
    }

    /// Whether `name` looks like a temporary file staged by this store
    ///
    /// Only the exact `<filename>.<random><temp_suffix>` shape matches, so
    /// sibling files such as `meta.json.bak` are never mistaken for one.
    pub fn is_temp_name(&self, name: &str) -> bool {
        let Some(rest) = name.strip_prefix(&self.temp_prefix()) else {
            return false;
        };
        let Some(random) = rest.strip_suffix(&self.temp_suffix) else {
            return false;
        };
        random.len() == TEMP_RAND_LEN && random.bytes().all(|b| b.is_ascii_alphanumeric())
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.filename.is_empty() {
            return Err(ConfigError::Message("store.filename must not be empty".into()));
        }
        if self.temp_suffix.is_empty() {
            return Err(ConfigError::Message("store.temp_suffix must not be empty".into()));
        }
        Ok(())
    }
}

impl MetaConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, additionally reading a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["block-meta.toml", ".block-meta.toml", "config/block-meta.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(dirs) = directories::ProjectDirs::from("io", "block-meta", "block-meta") {
            let xdg_config = dirs.config_dir().join("block-meta.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // BLOCK_META__STORE__SYNC_DIR=false
        builder = builder.add_source(
            Environment::with_prefix("BLOCK_META")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.store.check()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
