//! Configuration loaded from a TOML file with environment fallbacks.
//!
//! Settings resolve in order: explicit `--config` path, then
//! `$ALTGEN_CONFIG`, then `~/.config/altgen/config.toml`. A missing file
//! yields defaults so `altgen run` works out of the box with just an API key
//! in the environment.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::ApiConfig;
use crate::coordinator::CoordinatorConfig;
use crate::driver::DriverConfig;
use crate::eligibility::{EligibilityPolicy, MAX_FILE_BYTES, MIN_DIMENSION};

/// Environment variable naming an alternate config file.
pub const CONFIG_ENV: &str = "ALTGEN_CONFIG";

/// Eligibility policy as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityConfig {
    #[serde(default = "default_max_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_min_dimension")]
    pub min_width: u32,
    #[serde(default = "default_min_dimension")]
    pub min_height: u32,
    /// Narrows the supported extension set when present.
    #[serde(default)]
    pub extension_whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub excluded_categories: Vec<String>,
    /// Tolerate items with no determinable byte size.
    #[serde(default)]
    pub skip_missing_size: bool,
}

fn default_max_bytes() -> u64 {
    MAX_FILE_BYTES
}
fn default_min_dimension() -> u32 {
    MIN_DIMENSION
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_bytes(),
            min_width: default_min_dimension(),
            min_height: default_min_dimension(),
            extension_whitelist: None,
            excluded_categories: Vec::new(),
            skip_missing_size: false,
        }
    }
}

impl EligibilityConfig {
    pub fn to_policy(&self) -> EligibilityPolicy {
        EligibilityPolicy {
            max_bytes: self.max_file_bytes,
            min_width: self.min_width,
            min_height: self.min_height,
            extension_whitelist: self.extension_whitelist.clone(),
            excluded_categories: self.excluded_categories.clone(),
            skip_missing_size: self.skip_missing_size,
        }
    }
}

/// Embedded web server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7231
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Data directory holding the media database and session checkpoints.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub generation: CoordinatorConfig,
    #[serde(default)]
    pub eligibility: EligibilityConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("altgen")
}

impl Settings {
    /// Default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("altgen")
            .join("config.toml")
    }

    /// Load settings from the given path, `$ALTGEN_CONFIG`, or the default
    /// location, in that order. Missing files produce defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => expand(p),
            None => match std::env::var(CONFIG_ENV) {
                Ok(p) => expand(Path::new(&p)),
                Err(_) => Self::default_config_path(),
            },
        };
        if !path.exists() {
            return Ok(Self {
                data_dir: default_data_dir(),
                ..Self::default()
            });
        }
        let raw = fs::read_to_string(&path)?;
        let mut settings: Settings = toml::from_str(&raw)?;
        settings.data_dir = expand(&settings.data_dir);
        Ok(settings)
    }

    /// Write the current settings to the given path, creating parents.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("media.db")
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }
}

fn expand(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(s.as_ref()).into_owned())
}
