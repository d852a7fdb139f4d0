//! Configuration file support for insflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (INSFLASH_*)
//! 3. Local config file (./insflash.toml)
//! 4. Global config file (~/.config/insflash/config.toml)

use directories::ProjectDirs;
use insflash::UpgradePolicy;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Link kind ("uart" or "eth").
    pub interface: Option<String>,
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Serial baud rate.
    pub baud: Option<u32>,
    /// Ethernet interface name.
    pub iface: Option<String>,
    /// Device model ("rtk330l", "ins401", "ins502", "beidou").
    pub device: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Upgrade budget overrides; unset fields keep their defaults.
    #[serde(default)]
    pub upgrade: Option<UpgradePolicy>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("insflash.toml")) {
            debug!("Loaded local config from insflash.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "insflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Budgets for an upgrade session.
    pub fn upgrade_policy(&self) -> UpgradePolicy {
        self.upgrade.clone().unwrap_or_default()
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        let conn = other.connection;
        if conn.interface.is_some() {
            self.connection.interface = conn.interface;
        }
        if conn.serial.is_some() {
            self.connection.serial = conn.serial;
        }
        if conn.baud.is_some() {
            self.connection.baud = conn.baud;
        }
        if conn.iface.is_some() {
            self.connection.iface = conn.iface;
        }
        if conn.device.is_some() {
            self.connection.device = conn.device;
        }
        if other.upgrade.is_some() {
            self.upgrade = other.upgrade;
        }
    }
}
