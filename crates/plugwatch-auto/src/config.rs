//! Auto-connect configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wait between an arrival and the connect call
pub const DEFAULT_ENUMERATION_DELAY_MS: u64 = 6000;

/// Runtime-mutable auto-connect settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoConnectConfig {
    /// Start subscribed
    #[serde(default)]
    pub enabled: bool,
    /// Wait after an arrival before connecting (milliseconds), letting the
    /// bootloader hand off and the OS finish enumerating
    #[serde(default = "default_enumeration_delay_ms")]
    pub enumeration_delay_ms: u64,
}

fn default_enumeration_delay_ms() -> u64 {
    DEFAULT_ENUMERATION_DELAY_MS
}

impl AutoConnectConfig {
    pub fn enumeration_delay(&self) -> Duration {
        Duration::from_millis(self.enumeration_delay_ms)
    }
}

impl Default for AutoConnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            enumeration_delay_ms: DEFAULT_ENUMERATION_DELAY_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AutoConnectConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.enumeration_delay(), Duration::from_secs(6));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: AutoConnectConfig = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.enumeration_delay_ms, DEFAULT_ENUMERATION_DELAY_MS);

        let config: AutoConnectConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AutoConnectConfig::default());
    }
}
