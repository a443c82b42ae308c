use std::path::{Path, PathBuf};

use courier_check::CheckConfig;
use courier_dsn::DsnConfig;
use courier_storage::StorageConfig;
use serde::Deserialize;

/// Top level configuration, read from a RON file.
///
/// ```ron
/// Courier(
///     hostname: "mx.example.com",
///     storage: (driver: "memory"),
///     checks: [ (name: "sender_blocklist", args: ["spam@example.net"]) ],
///     dsn: (reporting_mta: "mx.example.com", postmaster: "postmaster@example.com"),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "Courier")]
pub struct CourierConfig {
    /// Our own name, used in `Received` fields
    pub hostname: String,

    /// Where relative storage paths are resolved from
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Timeout for reverse lookups of the peer address, in seconds
    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_secs: u64,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Checks run for every message, in this order
    #[serde(default, alias = "check")]
    pub checks: Vec<CheckConfig>,

    #[serde(default)]
    pub dsn: DsnConfig,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/courier")
}

const fn default_dns_timeout() -> u64 {
    5
}

impl CourierConfig {
    /// # Errors
    /// If `text` is not a valid configuration
    pub fn from_ron(text: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(text)?)
    }

    /// Read and parse the configuration file at `path`.
    ///
    /// # Errors
    /// If the file cannot be read or parsed
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Self::from_ron(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))
    }
}

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// # Errors
/// If `COURIER_CONFIG` names a missing file, or no file is found
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("COURIER_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "COURIER_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./courier.config.ron"),
        PathBuf::from("/etc/courier/courier.config.ron"),
    ];

    if let Some(path) = default_paths.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - COURIER_CONFIG environment variable\n{paths_tried}"
    )
}
