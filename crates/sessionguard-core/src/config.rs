//! Session configuration management.
//!
//! This module handles loading and saving the session configuration: the
//! remote API location, the inactivity timeout and warning window, and where
//! tokens are persisted.
//!
//! Configuration is stored at `~/.config/sessionguard/config.json`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Application name used for config/storage directory paths
const APP_NAME: &str = "sessionguard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// 30 minutes of inactivity ends the session.
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 1800;

/// The countdown is shown for the last 5 minutes.
const DEFAULT_WARNING_WINDOW_SECS: u64 = 300;

const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Refresh the access token when it has less than a minute left.
const DEFAULT_REFRESH_LEEWAY_SECS: u64 = 60;

/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub api_base_url: String,
    pub session_timeout_secs: u64,
    pub warning_window_secs: u64,
    pub tick_interval_ms: u64,
    pub expiry_margin_secs: u64,
    pub refresh_leeway_secs: u64,
    pub request_timeout_secs: u64,
    pub login_path: String,
    pub storage_dir: Option<PathBuf>,
    pub encrypt_storage: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            warning_window_secs: DEFAULT_WARNING_WINDOW_SECS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            expiry_margin_secs: 0,
            refresh_leeway_secs: DEFAULT_REFRESH_LEEWAY_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            storage_dir: None,
            encrypt_storage: false,
        }
    }
}

impl SessionConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
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

    /// Directory holding persisted tokens.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.storage_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find local data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Override settings from `SESSIONGUARD_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SESSIONGUARD_API_URL") {
            self.api_base_url = url;
        }
        if let Ok(value) = std::env::var("SESSIONGUARD_SESSION_TIMEOUT") {
            self.session_timeout_secs = value
                .parse()
                .context("SESSIONGUARD_SESSION_TIMEOUT must be a number of seconds")?;
        }
        if let Ok(value) = std::env::var("SESSIONGUARD_WARNING_WINDOW") {
            self.warning_window_secs = value
                .parse()
                .context("SESSIONGUARD_WARNING_WINDOW must be a number of seconds")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_timeout_secs == 0 {
            bail!("session_timeout_secs must be greater than zero");
        }
        if self.warning_window_secs >= self.session_timeout_secs {
            bail!(
                "warning_window_secs ({}) must be shorter than session_timeout_secs ({})",
                self.warning_window_secs,
                self.session_timeout_secs
            );
        }
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::seconds(self.session_timeout_secs as i64)
    }

    pub fn warning_window(&self) -> Duration {
        Duration::seconds(self.warning_window_secs as i64)
    }

    pub fn expiry_margin(&self) -> Duration {
        Duration::seconds(self.expiry_margin_secs as i64)
    }

    pub fn refresh_leeway(&self) -> Duration {
        Duration::seconds(self.refresh_leeway_secs as i64)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
