//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_ENV_VAR: &str = "ROASTSYNC_ROOT";

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "ROASTSYNC_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "roastsync.db";

/// Legacy profile directory name inside the root folder
pub const PROFILES_DIR: &str = "profiles";

/// Seeded default user (matches the `users` bootstrap row)
pub const ANONYMOUS_USER_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Server configuration read from `config.toml`
///
/// Every field is optional in the file; missing values take the defaults
/// below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub profiles_dir: Option<PathBuf>,
    pub bind_address: String,
    pub port: u16,
    /// Starting stock for coffees auto-created from an unknown `coffee` id
    pub placeholder_stock_kg: f64,
    pub default_user_id: Option<String>,
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Wall-clock offset used for weekday/time-of-day task triggers
    pub utc_offset_minutes: i32,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            database_path: None,
            profiles_dir: None,
            bind_address: "127.0.0.1".to_string(),
            port: 5740,
            placeholder_stock_kg: 1000.0,
            default_user_id: None,
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            utc_offset_minutes: 180,
        }
    }
}

impl TomlConfig {
    /// Parse configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }

    /// Load from an explicit path; a missing file is an error
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load following the lookup order: explicit path, env var, platform default.
    /// Falls back to built-in defaults when no file exists.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&path));
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Database file path: explicit setting, else `<root>/roastsync.db`
    pub fn database_path(&self, root: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| root.join(DATABASE_FILE))
    }

    /// Legacy profile directory: explicit setting, else `<root>/profiles`
    pub fn profiles_dir(&self, root: &Path) -> PathBuf {
        self.profiles_dir
            .clone()
            .unwrap_or_else(|| root.join(PROFILES_DIR))
    }

    /// Caller used when a request carries no identity header
    pub fn default_user(&self) -> uuid::Uuid {
        let configured = self
            .default_user_id
            .as_deref()
            .and_then(|s| uuid::Uuid::parse_str(s).ok());
        if self.default_user_id.is_some() && configured.is_none() {
            warn!("Ignoring malformed default_user_id in config");
        }
        configured.unwrap_or_else(anonymous_user)
    }
}

/// The seeded Anonymous user id
pub fn anonymous_user() -> uuid::Uuid {
    uuid::Uuid::parse_str(ANONYMOUS_USER_ID).unwrap_or_else(|_| uuid::Uuid::nil())
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `root_folder` from the TOML config
/// 4. OS-dependent default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
        return PathBuf::from(path);
    }
    if let Some(path) = &config.root_folder {
        return path.clone();
    }
    default_root_folder()
}

/// `<config_dir>/roastsync/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("roastsync").join("config.toml"))
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("roastsync"))
        .unwrap_or_else(|| PathBuf::from("./roastsync_data"))
}
