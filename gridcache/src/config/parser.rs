//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;

const SIZE_REASON: &str = "expected format like '2GB', '500MB', or '1024KB'";

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("resident_budget") {
            config.cache.resident_budget = if is_off(v) {
                None
            } else {
                Some(parse_size(v).map_err(|_| invalid("cache", "resident_budget", v, SIZE_REASON))?)
            };
        }
        if let Some(v) = section.get("idle_clear_delay") {
            config.cache.idle_clear_delay_secs = if is_off(v) {
                None
            } else {
                Some(v.trim().parse().map_err(|_| {
                    invalid(
                        "cache",
                        "idle_clear_delay",
                        v,
                        "must be a whole number of seconds, 0 or 'none'",
                    )
                })?)
            };
        }
        if let Some(v) = section.get("spill_directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.spill_directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("housekeeping_interval") {
            config.cache.housekeeping_interval_secs = v.trim().parse().map_err(|_| {
                invalid(
                    "cache",
                    "housekeeping_interval",
                    v,
                    "must be a whole number of seconds (0 disables the daemon)",
                )
            })?;
        }
        if let Some(v) = section.get("min_spill_size") {
            config.cache.min_spill_bytes =
                parse_size(v).map_err(|_| invalid("cache", "min_spill_size", v, SIZE_REASON))?;
        }
        if let Some(v) = section.get("budget_target_ratio") {
            let ratio: f64 = v.trim().parse().map_err(|_| {
                invalid("cache", "budget_target_ratio", v, "must be a number")
            })?;
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(invalid(
                    "cache",
                    "budget_target_ratio",
                    v,
                    "must be greater than 0 and at most 1",
                ));
            }
            config.cache.budget_target_ratio = ratio;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// True for values that switch an optional limit off: empty, `0`, `none`, `off`.
pub(super) fn is_off(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v.is_empty() || v == "0" || v == "none" || v == "off"
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
