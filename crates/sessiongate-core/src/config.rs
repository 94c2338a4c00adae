//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the backend base URL, whether the app runs in production, where the
//! access token is persisted, the last used email and the route table.
//!
//! Configuration is stored at `~/.config/sessiongate/config.json`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::{FileStorage, KeyringStorage, MemoryStorage, NoStorage, TokenStorage};
use crate::routes::RouteTable;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessiongate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Environment variable overriding `api_base_url`
pub const ENV_API_BASE_URL: &str = "SESSIONGATE_API_BASE_URL";

/// Environment variable overriding `production`
pub const ENV_PRODUCTION: &str = "SESSIONGATE_PRODUCTION";

/// Where the access token is kept between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    None,
    Memory,
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub production: bool,
    pub persistence: Persistence,
    pub last_email: Option<String>,
    pub routes: RouteTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            production: false,
            persistence: Persistence::default(),
            last_email: None,
            routes: RouteTable::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_API_BASE_URL).ok(),
            std::env::var(ENV_PRODUCTION).ok(),
        );
    }

    fn apply_overrides(&mut self, api_base_url: Option<String>, production: Option<String>) {
        if let Some(url) = api_base_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(value) = production {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.production = true,
                "0" | "false" | "no" | "" => self.production = false,
                other => warn!(value = other, "Ignoring unrecognized {}", ENV_PRODUCTION),
            }
        }
    }

    /// Build the token storage selected by `persistence`
    pub fn token_storage(&self) -> Result<Arc<dyn TokenStorage>> {
        Ok(match self.persistence {
            Persistence::None => Arc::new(NoStorage),
            Persistence::Memory => Arc::new(MemoryStorage::new()),
            Persistence::File => Arc::new(FileStorage::new(self.cache_dir()?)),
            Persistence::Keyring => Arc::new(KeyringStorage::new()),
        })
    }
}
