//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;
use super::size::format_size;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let cache = &config.cache;
    let resident_budget = cache
        .resident_budget
        .map(format_size)
        .unwrap_or_else(|| "none".to_string());
    let idle_clear_delay = cache
        .idle_clear_delay_secs
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string());

    format!(
        r#"[cache]
; Resident memory budget for grid buffers (default: 1GB)
; Least recently used buffers are spilled to disk when the budget is exceeded.
; Supports: KB, MB, GB suffixes. Use 'none' for no budget.
resident_budget = {}
; Seconds a buffer may sit unused before it is spilled (default: none)
idle_clear_delay = {}
; Root directory for spill files. Each cache instance uses its own
; session-<id> subdirectory, removed on shutdown.
spill_directory = {}
; Seconds between background housekeeping passes (0 = no background thread)
housekeeping_interval = {}
; Buffers smaller than this always stay in memory (default: 64KB)
min_spill_size = {}
; Budget spilling frees memory down to budget * ratio (0 < ratio <= 1)
budget_target_ratio = {}

[logging]
; Directory for log files
directory = {}
; Log file name (truncated at the start of each session)
file = {}
"#,
        resident_budget,
        idle_clear_delay,
        path_to_string(&cache.spill_directory),
        cache.housekeeping_interval_secs,
        format_size(cache.min_spill_bytes),
        cache.budget_target_ratio,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_has_sections() {
        let content = to_config_string(&ConfigFile::default());
        assert!(content.contains("[cache]"));
        assert!(content.contains("[logging]"));
        assert!(content.contains("resident_budget = 1GB"));
        assert!(content.contains("idle_clear_delay = none"));
        assert!(content.contains("min_spill_size = 64KB"));
    }

    #[test]
    fn test_disabled_budget_written_as_none() {
        let mut config = ConfigFile::default();
        config.cache.resident_budget = None;
        let content = to_config_string(&config);
        assert!(content.contains("resident_budget = none"));
    }
}
