use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::ConfigError;

/// Configuration for local mailbox storage.
///
/// ```ron
/// (
///     driver: "memory",
///     append_limit: Some(33554432),
///     storage_per_domain: false,
///     junk_mailbox: "Junk",
///     blob_store: Some("blobs"),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend identity, `memory` is built in
    pub driver: String,

    /// Backend connection string
    #[serde(default)]
    pub dsn: String,

    /// Maximum accepted message size in bytes, `None` for no limit
    #[serde(default = "default_append_limit")]
    pub append_limit: Option<u32>,

    /// Log transaction progress at DEBUG instead of TRACE
    #[serde(default)]
    pub debug: bool,

    /// Use the full address, domain included, as the account name
    #[serde(default)]
    pub storage_per_domain: bool,

    /// Require logins to carry one of `auth_domains`
    #[serde(default)]
    pub auth_per_domain: bool,

    #[serde(default)]
    pub auth_domains: Vec<String>,

    /// Mailbox used for quarantined messages when the account has no
    /// mailbox marked as junk
    #[serde(default = "default_junk_mailbox")]
    pub junk_mailbox: String,

    /// External message blob directory. Relative paths are taken from the
    /// state directory.
    #[serde(default)]
    pub blob_store: Option<PathBuf>,

    #[serde(default)]
    pub tuning: Tuning,
}

/// Backend specific knobs; backends ignore what they do not understand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Tuning {
    #[serde(default)]
    pub cache_size: i64,
    #[serde(default)]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub exclusive_lock: bool,
}

#[allow(clippy::unnecessary_wraps)]
const fn default_append_limit() -> Option<u32> {
    Some(32 * 1024 * 1024)
}

fn default_junk_mailbox() -> String {
    String::from("Junk")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: String::from("memory"),
            dsn: String::new(),
            append_limit: default_append_limit(),
            debug: false,
            storage_per_domain: false,
            auth_per_domain: false,
            auth_domains: Vec::new(),
            junk_mailbox: default_junk_mailbox(),
            blob_store: None,
            tuning: Tuning::default(),
        }
    }
}

impl StorageConfig {
    /// Parse and validate a RON storage block.
    ///
    /// # Errors
    /// If the text is not valid RON for this structure, or fails [`Self::validate`]
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// If no driver is named, or per-domain auth is enabled without any
    /// allowed domains
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver.trim().is_empty() {
            return Err(ConfigError::MissingDriver);
        }

        if self.auth_per_domain && self.auth_domains.is_empty() {
            return Err(ConfigError::MissingAuthDomains);
        }

        Ok(())
    }

    /// Resolve the blob store against `state_dir` and make sure it exists.
    ///
    /// # Errors
    /// If the directory cannot be created
    pub fn prepare_blob_store(&self, state_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
        let Some(location) = &self.blob_store else {
            return Ok(None);
        };

        let path = if location.is_absolute() {
            location.clone()
        } else {
            state_dir.join(location)
        };

        std::fs::create_dir_all(&path).map_err(|source| ConfigError::BlobStore {
            path: path.clone(),
            source,
        })?;

        Ok(Some(path))
    }
}
