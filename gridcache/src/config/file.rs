//! `~/.gridcache/config.ini`: reading, writing and conversion to
//! [`CacheConfig`].
//!
//! A missing file means defaults. Section parsing lives in
//! [`super::parser`], INI output in [`super::writer`].

use ini::Ini;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use super::settings::*;

use super::CacheConfig;

const CONFIG_DIRECTORY_NAME: &str = ".gridcache";
const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors loading or saving the config file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// File exists but is not valid INI
    #[error("Cannot read grid cache config: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Cannot write grid cache config: {0}")]
    WriteError(String),

    /// A key holds a value its setting cannot accept
    #[error("[{section}] {key} = '{value}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Cannot create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Read `~/.gridcache/config.ini`, or defaults if it does not exist.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Read a config file, or defaults if `path` does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        match path.try_exists() {
            Ok(true) => super::parser::parse_ini(&Ini::load_from_file(path)?),
            _ => Ok(Self::default()),
        }
    }

    /// Write the configuration, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(ConfigFileError::DirectoryError)?;
        }
        fs::write(path, super::writer::to_config_string(self))
            .map_err(|e| ConfigFileError::WriteError(format!("{}: {}", path.display(), e)))
    }

    /// Runtime cache configuration for the `[cache]` section.
    pub fn to_cache_config(&self) -> CacheConfig {
        let settings = &self.cache;
        CacheConfig::new()
            .with_resident_budget(settings.resident_budget)
            .with_idle_clear_delay(settings.idle_clear_delay_secs.map(Duration::from_secs))
            .with_spill_directory(&settings.spill_directory)
            .with_housekeeping_interval(Duration::from_secs(settings.housekeeping_interval_secs))
            .with_min_spill_bytes(settings.min_spill_bytes)
            .with_budget_target_ratio(settings.budget_target_ratio)
    }
}

/// `~/.gridcache`, or `./.gridcache` when there is no home directory.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIRECTORY_NAME)
}

/// `~/.gridcache/config.ini`.
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}
