//! Spill selection: idle expiry and the resident memory budget.
//!
//! Selection is pure. The store snapshots its entries into
//! [`SpillCandidate`]s, asks the policy which ids to spill, and then
//! re-checks each entry under its lock before acting.

use crate::cache::types::BufferId;
use crate::config::CacheConfig;
use std::time::{Duration, Instant};

/// Snapshot of one resident entry taken during housekeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpillCandidate {
    pub id: BufferId,
    pub last_access: Instant,
    pub size_bytes: u64,
}

/// When resident buffers are spilled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    pub idle_clear_delay: Option<Duration>,
    pub resident_budget: Option<u64>,
    pub budget_target_ratio: f64,
    pub min_spill_bytes: u64,
}

impl EvictionPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            idle_clear_delay: config.idle_clear_delay(),
            resident_budget: config.resident_budget(),
            budget_target_ratio: config.budget_target_ratio(),
            min_spill_bytes: config.min_spill_bytes(),
        }
    }

    /// Whether a buffer of this size may ever leave memory.
    pub fn is_spillable(&self, size_bytes: u64) -> bool {
        size_bytes > 0 && size_bytes >= self.min_spill_bytes
    }

    /// Resident bytes that budget spilling aims for.
    pub fn budget_target(&self) -> Option<u64> {
        self.resident_budget
            .map(|budget| (budget as f64 * self.budget_target_ratio) as u64)
    }

    /// Whether `resident_bytes` exceeds the budget.
    pub fn over_budget(&self, resident_bytes: u64) -> bool {
        self.resident_budget
            .is_some_and(|budget| resident_bytes > budget)
    }

    /// Entries idle for longer than the idle delay.
    pub fn select_idle(&self, candidates: &[SpillCandidate], now: Instant) -> Vec<BufferId> {
        let Some(delay) = self.idle_clear_delay else {
            return Vec::new();
        };
        candidates
            .iter()
            .filter(|c| self.is_spillable(c.size_bytes))
            .filter(|c| now.saturating_duration_since(c.last_access) >= delay)
            .map(|c| c.id)
            .collect()
    }

    /// Least recently used entries to spill until usage is back at the
    /// budget target. Empty when usage is within budget.
    pub fn select_for_budget(
        &self,
        candidates: &[SpillCandidate],
        resident_bytes: u64,
    ) -> Vec<BufferId> {
        let (Some(target), true) = (self.budget_target(), self.over_budget(resident_bytes)) else {
            return Vec::new();
        };

        let mut ordered: Vec<&SpillCandidate> = candidates
            .iter()
            .filter(|c| self.is_spillable(c.size_bytes))
            .collect();
        ordered.sort_by_key(|c| c.last_access);

        let mut remaining = resident_bytes;
        let mut selected = Vec::new();
        for candidate in ordered {
            if remaining <= target {
                break;
            }
            remaining = remaining.saturating_sub(candidate.size_bytes);
            selected.push(candidate.id);
        }
        selected
    }
}

/// Outcome of one housekeeping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Entries spilled because they were idle
    pub idle_spilled: usize,
    /// Entries spilled to get back under budget
    pub budget_spilled: usize,
    /// Selected entries that were busy or changed since selection
    pub skipped: usize,
    /// Spill writes that failed (entry stays resident)
    pub failed: usize,
    /// Resident bytes released
    pub bytes_freed: u64,
}

impl HousekeepingReport {
    pub fn spilled(&self) -> usize {
        self.idle_spilled + self.budget_spilled
    }

    pub fn is_empty(&self) -> bool {
        self.spilled() == 0 && self.skipped == 0 && self.failed == 0
    }
}
