//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Cache settings
    pub cache: CacheSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Resident memory budget in bytes (`None` = unbounded)
    pub resident_budget: Option<u64>,
    /// Idle time before a buffer is spilled (`None` = never)
    pub idle_clear_delay_secs: Option<u64>,
    /// Root directory for spill files
    pub spill_directory: PathBuf,
    /// Seconds between housekeeping passes (0 disables the daemon)
    pub housekeeping_interval_secs: u64,
    /// Buffers smaller than this stay resident
    pub min_spill_bytes: u64,
    /// Budget spilling stops at `budget * ratio`
    pub budget_target_ratio: f64,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Directory for log files
    pub directory: PathBuf,
    /// Log file name inside `directory`
    pub file: String,
}
