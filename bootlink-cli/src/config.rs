//! Configuration file support.
//!
//! Settings come from four places; the first match wins:
//! command-line flags, `BOOTLINK_*` environment variables, a local
//! `./bootlink.toml`, and the global `~/.config/bootlink/config.toml`.
//! The two files are merged field by field, local over global.

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port to default to when no flag or env var names one.
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Upload configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadPrefs {
    /// Last firmware source that was flashed.
    pub image: Option<PathBuf>,
    /// Skip the pre-upload reset pulse by default.
    #[serde(default)]
    pub no_reset: bool,
}

/// Everything the CLI reads from config files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Upload settings.
    #[serde(default)]
    pub upload: UploadPrefs,
}

/// Local config file name, searched in the working directory.
const LOCAL_CONFIG: &str = "bootlink.toml";

impl Config {
    /// Load and merge the global and local config files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Local file takes precedence
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load a single config file named by `--config`, no merging.
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Config file {} could not be loaded, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Parse one TOML file, warning instead of failing on bad content.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Per-user config directory for this tool.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "bootlink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Path of the global config file.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Overlay `other` onto this config; set fields win over unset ones.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.upload.image.is_some() {
            self.upload.image = other.upload.image;
        }
        if other.upload.no_reset {
            self.upload.no_reset = true;
        }
    }

    /// Remember the last-used serial port and baud rate.
    pub fn save_port(&mut self, serial: &str, baud: u32) -> anyhow::Result<()> {
        self.connection.serial = Some(serial.to_string());
        self.connection.baud = Some(baud);

        let path = if Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG)
        };

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("Saved connection settings to {}", path.display());

        Ok(())
    }
}
