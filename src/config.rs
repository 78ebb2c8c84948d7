use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::manager::ManagerOptions;
use crate::storage::StorageOptions;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 2_000;

/// Contents of `complink.toml`. Every field is optional; CLI flags win.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComplinkConfig {
    pub database: Option<String>,
    pub port: Option<u16>,
    pub request_timeout_ms: Option<u64>,
    pub busy_timeout_ms: Option<u64>,
    pub require_existing_entities: Option<bool>,
}

/// Fully resolved server settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database: PathBuf,
    pub port: u16,
    pub request_timeout: Duration,
    pub busy_timeout: Duration,
    pub require_existing_entities: bool,
}

impl ComplinkConfig {
    /// Overlay `other` on top of `self`; fields set in `other` win
    pub fn merge(self, other: ComplinkConfig) -> ComplinkConfig {
        ComplinkConfig {
            database: other.database.or(self.database),
            port: other.port.or(self.port),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            busy_timeout_ms: other.busy_timeout_ms.or(self.busy_timeout_ms),
            require_existing_entities: other.require_existing_entities.or(self.require_existing_entities),
        }
    }

    pub fn resolve(&self) -> Settings {
        Settings {
            database: self
                .database
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| default_database_path_in(Path::new("."))),
            port: self.port.unwrap_or(DEFAULT_PORT),
            request_timeout: Duration::from_millis(self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS)),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)),
            require_existing_entities: self.require_existing_entities.unwrap_or(false),
        }
    }

    /// The config `init` writes: every default spelled out
    pub fn defaults() -> Self {
        Self {
            database: Some(default_database_path_in(Path::new(".")).display().to_string()),
            port: Some(DEFAULT_PORT),
            request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
            busy_timeout_ms: Some(DEFAULT_BUSY_TIMEOUT_MS),
            require_existing_entities: Some(false),
        }
    }
}

impl Settings {
    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            busy_timeout: self.busy_timeout,
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            require_existing_entities: self.require_existing_entities,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("complink.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".complink").join("complink.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<ComplinkConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: ComplinkConfig = toml::from_str(&contents)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &ComplinkConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
