//! Configuration management for Orbitdrop.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/orbitdrop/config.toml` |
//! | macOS | `~/Library/Application Support/Orbitdrop/config.toml` |
//! | Windows | `%APPDATA%\Orbitdrop\config.toml` |
//!
//! The device id is generated on first load and persisted, so the same
//! logical device survives reconnects and process restarts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{default_device_name, generate_device_id, DeviceInfo, DeviceType};
use crate::error::{Error, Result};
use crate::transfer::TransferSettings;

/// Main configuration struct for Orbitdrop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Hub server settings
    pub hub: HubConfig,
    /// Client network settings
    pub network: NetworkConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Stable device id, generated once
    pub device_id: String,
    /// Display name shown to other devices
    pub device_name: String,
    /// Form factor announced to the hub
    pub device_type: DeviceType,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_id: generate_device_id(),
            device_name: default_device_name(),
            device_type: DeviceType::Desktop,
        }
    }
}

/// Hub server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address the hub binds to
    pub bind_addr: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", crate::DEFAULT_HUB_PORT),
        }
    }
}

/// Client network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// WebSocket URL of the signaling hub
    pub hub_url: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hub_url: format!("ws://127.0.0.1:{}/ws", crate::DEFAULT_HUB_PORT),
        }
    }
}

/// Transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Payload bytes per chunk
    pub chunk_size: u32,
    /// Maximum unacknowledged chunks in flight
    pub window_size: usize,
    /// Milliseconds before an unacked chunk is resent
    pub resend_timeout_ms: u64,
    /// Milliseconds between send ticks
    pub tick_interval_ms: u64,
    /// Route payloads through the hub when no direct channel exists
    pub relay_fallback: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::CHUNK_SIZE,
            window_size: crate::SEND_WINDOW_SIZE,
            resend_timeout_ms: crate::RESEND_TIMEOUT_MS,
            tick_interval_ms: crate::SEND_TICK_MS,
            relay_fallback: true,
        }
    }
}

impl TransferConfig {
    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn settings(&self) -> TransferSettings {
        TransferSettings {
            chunk_size: self.chunk_size,
            window_size: self.window_size,
            resend_timeout: Duration::from_millis(self.resend_timeout_ms),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
        }
    }
}

impl Config {
    /// Load the configuration from the default path.
    ///
    /// A missing file yields the defaults, which are written back so the
    /// generated device id persists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if a fresh default cannot be written.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Self::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Load the configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    /// Save the configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save the configuration to a specific path, creating parent
    /// directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Platform-specific path of the configuration file.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("com", "orbitdrop", "Orbitdrop")
            .ok_or_else(|| Error::Config("cannot determine config directory".to_string()))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Identity announced in the hub `hello`.
    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.general.device_id.clone(),
            name: self.general.device_name.clone(),
            device_type: self.general.device_type,
            client_version: Some(crate::VERSION.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.general.device_id.is_empty());
        assert!(!config.general.device_name.is_empty());
        assert_eq!(config.transfer.chunk_size, 64 * 1024);
        assert_eq!(config.transfer.window_size, 8);
        assert_eq!(config.transfer.resend_timeout_ms, 2000);
        assert_eq!(config.transfer.tick_interval_ms, 120);
        assert!(config.transfer.relay_fallback);
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.general.device_name = "Test Device".to_string();
        config.transfer.chunk_size = 1024;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.general.device_name, "Test Device");
        assert_eq!(loaded.general.device_id, config.general.device_id);
        assert_eq!(loaded.transfer.chunk_size, 1024);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[transfer]\nchunk_size = 2048\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.transfer.chunk_size, 2048);
        assert_eq!(loaded.transfer.window_size, 8);
        assert!(!loaded.general.device_id.is_empty());
    }

    #[test]
    fn test_settings_conversion() {
        let config = TransferConfig::default();
        let settings = config.settings();
        assert_eq!(settings.resend_timeout, Duration::from_millis(2000));
        assert_eq!(settings.tick_interval, Duration::from_millis(120));
    }
}
