//! Daemon settings

use std::path::{Path, PathBuf};

use plugwatch_auto::AutoConnectConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DaemonError;

/// Daemon settings, persisted as JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Auto-connect controller settings
    #[serde(default = "default_auto_connect")]
    pub auto_connect: AutoConnectConfig,
    /// Baud rate used to open the autopilot port
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// How often the port monitor re-enumerates, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Auto-connect is suppressed while this file exists
    #[serde(default)]
    pub block_file: Option<PathBuf>,
    /// Port name substrings the scanner ignores
    #[serde(default = "default_skip_patterns")]
    pub skip_patterns: Vec<String>,
}

/// Auto-connect starts enabled unless the file turns it off
fn default_auto_connect() -> AutoConnectConfig {
    AutoConnectConfig {
        enabled: true,
        ..AutoConnectConfig::default()
    }
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_skip_patterns() -> Vec<String> {
    vec!["Bluetooth".to_string(), "debug-console".to_string()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_connect: default_auto_connect(),
            baud_rate: default_baud_rate(),
            poll_interval_ms: default_poll_interval_ms(),
            block_file: None,
            skip_patterns: default_skip_patterns(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for plugwatch
    /// Uses $XDG_CONFIG_HOME/plugwatch, falls back to ~/.config/plugwatch
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("plugwatch"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("plugwatch"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from `path`; a missing or unreadable file yields defaults
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return Self::default(),
        };

        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!("Ignoring invalid settings file {}: {}", path.display(), e);
            Self::default()
        })
    }

    /// Load settings, writing the defaults out on first run
    pub fn load_or_create() -> Self {
        let Some(path) = Self::settings_path() else {
            warn!("{}; using defaults", DaemonError::NoSettingsPath);
            return Self::default();
        };

        if path.exists() {
            debug!("Loading settings from {}", path.display());
            return Self::load_from(&path);
        }

        let settings = Self::default();
        match settings.save_to(&path) {
            Ok(()) => info!("Wrote default settings to {}", path.display()),
            Err(e) => warn!("{}", e),
        }
        settings
    }

    /// Save settings to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), DaemonError> {
        let io_err = |source| DaemonError::SettingsIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(io_err)?;

        Ok(())
    }
}
