//! Configuration loading for service-catalog.
//!
//! Settings come from a TOML file, then environment variables override
//! individual fields. A missing file means defaults, which point the local
//! backend at `./data/services.json`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;

use crate::logging::LogFormat;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SERVICE_CATALOG_CONFIG";

/// Top-level configuration loaded from config.toml.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which persistence backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Azure,
}

impl FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "azure" => Ok(Self::Azure),
            other => anyhow::bail!("Unknown storage type: {other}"),
        }
    }
}

/// Configuration for the catalog document location.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default)]
    pub azure: AzureStorageConfig,
}

/// Azure Blob Storage settings, used when `kind = "azure"`.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureStorageConfig {
    #[serde(default)]
    pub account_name: String,
    /// Used only when managed identity is disabled.
    #[serde(default)]
    pub connection_string: String,
    #[serde(default = "default_container_name")]
    pub container_name: String,
    #[serde(default = "default_blob_name")]
    pub blob_name: String,
    #[serde(default)]
    pub use_managed_identity: bool,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_local_path() -> String {
    "./data/services.json".to_string()
}

fn default_container_name() -> String {
    "data".to_string()
}

fn default_blob_name() -> String {
    "services.json".to_string()
}

fn default_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            local_path: default_local_path(),
            azure: AzureStorageConfig::default(),
        }
    }
}

impl Default for AzureStorageConfig {
    fn default() -> Self {
        Self {
            account_name: String::new(),
            connection_string: String::new(),
            container_name: default_container_name(),
            blob_name: default_blob_name(),
            use_managed_identity: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            api_prefix: default_api_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config, then apply environment overrides.
    ///
    /// The file is `explicit` if given, else `$SERVICE_CATALOG_CONFIG`, else
    /// `config.toml` in the platform config dir. A missing file yields
    /// defaults; an explicitly named file must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// environment override has an invalid value.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        let mut config = match named {
            Some(path) => Self::from_file(&path)?,
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Config::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read config {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "service-catalog")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Override fields from environment-style variables.
    ///
    /// `lookup` returns the value for a variable name, so tests can supply
    /// a map instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown `STORAGE_TYPE` or `LOG_FORMAT`, or a
    /// non-boolean `AZURE_STORAGE_USE_MANAGED_IDENTITY`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(kind) = lookup("STORAGE_TYPE") {
            self.storage.kind = kind.parse()?;
        }
        if let Some(path) = lookup("LOCAL_DATA_PATH") {
            self.storage.local_path = path;
        }

        let azure = &mut self.storage.azure;
        if let Some(account) = lookup("AZURE_STORAGE_ACCOUNT_NAME") {
            azure.account_name = account;
        }
        if let Some(connection_string) = lookup("AZURE_STORAGE_CONNECTION_STRING") {
            azure.connection_string = connection_string;
        }
        if let Some(container) = lookup("AZURE_STORAGE_CONTAINER_NAME") {
            azure.container_name = container;
        }
        if let Some(blob) = lookup("AZURE_STORAGE_BLOB_NAME") {
            azure.blob_name = blob;
        }
        if let Some(flag) = lookup("AZURE_STORAGE_USE_MANAGED_IDENTITY") {
            azure.use_managed_identity = parse_bool(&flag).ok_or_else(|| {
                anyhow::anyhow!("AZURE_STORAGE_USE_MANAGED_IDENTITY must be true or false")
            })?;
        }

        if let Some(addr) = lookup("SERVER_ADDR") {
            self.server.addr = addr;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.to_ascii_lowercase();
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand ~ to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(base_dirs) = BaseDirs::new()
    {
        return base_dirs.home_dir().join(rest);
    }
    PathBuf::from(path)
}
