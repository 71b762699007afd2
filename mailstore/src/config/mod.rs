use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, StoreError};

/// Local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file. `None` keeps the store in memory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Root directory for attachment payloads
    #[serde(default = "default_attachment_dir")]
    pub attachment_dir: PathBuf,

    /// Maximum number of pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Prefix for per-folder preference keys
    #[serde(default = "default_store_id")]
    pub store_id: String,

    /// Name of the folder treated as the inbox
    #[serde(default = "default_inbox_folder_name")]
    pub inbox_folder_name: String,

    /// Visible limit given to new folders and restored by clear-all
    #[serde(default = "default_display_count")]
    pub display_count: u32,

    /// Number of UIDs checked per statement in `extract_new_messages`
    #[serde(default = "default_uid_check_batch_size")]
    pub uid_check_batch_size: usize,

    /// Namespace for UIDs generated locally (copies, moves, drafts)
    #[serde(default = "default_local_uid_prefix")]
    pub local_uid_prefix: String,

    /// Header whose presence marks a locally composed draft
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// Maximum length of the stored preview, in characters
    #[serde(default = "default_preview_length")]
    pub preview_length: usize,
}

fn default_attachment_dir() -> PathBuf {
    default_data_dir().join("attachments")
}

fn default_pool_size() -> u32 {
    8
}

fn default_store_id() -> String {
    "local".to_string()
}

fn default_inbox_folder_name() -> String {
    "INBOX".to_string()
}

fn default_display_count() -> u32 {
    25
}

fn default_uid_check_batch_size() -> usize {
    500
}

fn default_local_uid_prefix() -> String {
    "LOCAL:".to_string()
}

fn default_identity_header() -> String {
    "X-Identity".to_string()
}

fn default_preview_length() -> usize {
    512
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            attachment_dir: default_attachment_dir(),
            pool_size: default_pool_size(),
            store_id: default_store_id(),
            inbox_folder_name: default_inbox_folder_name(),
            display_count: default_display_count(),
            uid_check_batch_size: default_uid_check_batch_size(),
            local_uid_prefix: default_local_uid_prefix(),
            identity_header: default_identity_header(),
            preview_length: default_preview_length(),
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(content)
            .map_err(|e| StoreError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading store configuration from: {:?}", path);

        let content = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml_str(&content)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(StoreError::Config("pool_size must be at least 1".into()));
        }
        if self.uid_check_batch_size == 0 {
            return Err(StoreError::Config(
                "uid_check_batch_size must be at least 1".into(),
            ));
        }
        if self.local_uid_prefix.is_empty() {
            return Err(StoreError::Config("local_uid_prefix must not be empty".into()));
        }
        Ok(())
    }
}

/// Default directory for store data
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("mailstore")
}

/// Candidate locations for a configuration file, most specific first
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mailstore").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("mailstore").join("config.toml"));
    }

    paths
}

/// Load the first configuration file found, or the defaults if none exists
pub fn load_default() -> Result<StoreConfig> {
    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return StoreConfig::load(&path);
        }
    }

    info!("No config file found, using defaults");
    Ok(StoreConfig::default())
}
