//! Default values and constants for all configuration settings.
//!
//! Contains all `DEFAULT_*` constants, directory helpers,
//! and the `ConfigFile::default()` implementation.

use std::path::PathBuf;

use super::settings::*;

// =============================================================================
// Cache defaults
// =============================================================================

/// Default resident memory budget: 1GB
pub const DEFAULT_RESIDENT_BUDGET: u64 = 1024 * 1024 * 1024;

/// Default interval between housekeeping passes
pub const DEFAULT_HOUSEKEEPING_INTERVAL_SECS: u64 = 30;

/// Default minimum buffer size eligible for spilling: 64KB
pub const DEFAULT_MIN_SPILL_BYTES: u64 = 64 * 1024;

/// Fraction of the budget that budget-driven spilling brings usage down to
pub const DEFAULT_BUDGET_TARGET_RATIO: f64 = 0.8;

/// Name of the directory created under the system temp directory for spills
pub const SPILL_DIRECTORY_NAME: &str = "gridcache";

// =============================================================================
// Logging defaults
// =============================================================================

/// Default log file name
pub const DEFAULT_LOG_FILE_NAME: &str = "gridcache.log";

/// Default spill root: `<system temp>/gridcache`.
pub fn default_spill_directory() -> PathBuf {
    std::env::temp_dir().join(SPILL_DIRECTORY_NAME)
}

/// Default log directory: `~/.gridcache/logs`.
pub fn default_log_directory() -> PathBuf {
    super::file::config_directory().join("logs")
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            cache: CacheSettings {
                resident_budget: Some(DEFAULT_RESIDENT_BUDGET),
                idle_clear_delay_secs: None,
                spill_directory: default_spill_directory(),
                housekeeping_interval_secs: DEFAULT_HOUSEKEEPING_INTERVAL_SECS,
                min_spill_bytes: DEFAULT_MIN_SPILL_BYTES,
                budget_target_ratio: DEFAULT_BUDGET_TARGET_RATIO,
            },
            logging: LoggingSettings {
                directory: default_log_directory(),
                file: DEFAULT_LOG_FILE_NAME.to_string(),
            },
        }
    }
}
