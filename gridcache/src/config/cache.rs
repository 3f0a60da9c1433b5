//! Runtime configuration of a grid cache.

use super::defaults::{
    default_spill_directory, DEFAULT_BUDGET_TARGET_RATIO, DEFAULT_HOUSEKEEPING_INTERVAL_SECS,
    DEFAULT_MIN_SPILL_BYTES, DEFAULT_RESIDENT_BUDGET,
};
use crate::cache::CacheError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a [`GridCache`](crate::cache::GridCache).
///
/// # Example
///
/// ```
/// use gridcache::config::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::new()
///     .with_resident_budget(Some(256 * 1024 * 1024))
///     .with_idle_clear_delay(Some(Duration::from_secs(120)))
///     .with_spill_directory("/var/tmp/grids");
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.resident_budget(), Some(256 * 1024 * 1024));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Aggregate resident bytes that trigger spilling
    resident_budget: Option<u64>,
    /// Idle time after which a resident buffer is spilled
    idle_clear_delay: Option<Duration>,
    /// Root directory for spill session directories
    spill_directory: PathBuf,
    /// Interval of the housekeeping daemon (zero = no daemon)
    housekeeping_interval: Duration,
    /// Buffers smaller than this are never spilled
    min_spill_bytes: u64,
    /// Budget spilling stops at `budget * ratio`
    budget_target_ratio: f64,
}

impl CacheConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resident memory budget. `None` disables budget spilling.
    pub fn with_resident_budget(mut self, budget: Option<u64>) -> Self {
        self.resident_budget = budget;
        self
    }

    /// Set the idle delay. `None` disables idle spilling.
    pub fn with_idle_clear_delay(mut self, delay: Option<Duration>) -> Self {
        self.idle_clear_delay = delay;
        self
    }

    /// Set the spill root directory.
    pub fn with_spill_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_directory = dir.into();
        self
    }

    /// Set the housekeeping interval. Zero disables the background daemon;
    /// housekeeping then runs only when called explicitly.
    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    /// Set the minimum size of a spillable buffer.
    pub fn with_min_spill_bytes(mut self, bytes: u64) -> Self {
        self.min_spill_bytes = bytes;
        self
    }

    /// Set the budget target ratio (`0 < ratio <= 1`).
    pub fn with_budget_target_ratio(mut self, ratio: f64) -> Self {
        self.budget_target_ratio = ratio;
        self
    }

    pub fn resident_budget(&self) -> Option<u64> {
        self.resident_budget
    }

    pub fn idle_clear_delay(&self) -> Option<Duration> {
        self.idle_clear_delay
    }

    pub fn spill_directory(&self) -> &Path {
        &self.spill_directory
    }

    pub fn housekeeping_interval(&self) -> Duration {
        self.housekeeping_interval
    }

    pub fn min_spill_bytes(&self) -> u64 {
        self.min_spill_bytes
    }

    pub fn budget_target_ratio(&self) -> f64 {
        self.budget_target_ratio
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), CacheError> {
        if !(self.budget_target_ratio > 0.0 && self.budget_target_ratio <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "budget_target_ratio must be in (0, 1], got {}",
                self.budget_target_ratio
            )));
        }
        if self.spill_directory.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig(
                "spill_directory must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resident_budget: Some(DEFAULT_RESIDENT_BUDGET),
            idle_clear_delay: None,
            spill_directory: default_spill_directory(),
            housekeeping_interval: Duration::from_secs(DEFAULT_HOUSEKEEPING_INTERVAL_SECS),
            min_spill_bytes: DEFAULT_MIN_SPILL_BYTES,
            budget_target_ratio: DEFAULT_BUDGET_TARGET_RATIO,
        }
    }
}
