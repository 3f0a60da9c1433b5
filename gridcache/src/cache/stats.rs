//! Cache statistics tracking and reporting.

use crate::config::format_size;
use std::time::Instant;

/// Cache statistics for monitoring and debugging.
#[derive(Debug, Clone)]
pub struct CacheStats {
    // Access metrics
    pub hits: u64,
    pub misses: u64,

    // Producer metrics
    pub produces: u64,
    pub produce_failures: u64,

    // Spill metrics
    pub spills: u64,
    pub spill_failures: u64,
    pub clean_evictions: u64,
    pub restores: u64,
    pub restore_misses: u64,

    // Lifecycle
    pub registrations: u64,
    pub updates: u64,
    pub releases: u64,

    // Footprint (snapshot values)
    pub resident_bytes: u64,
    pub entry_count: usize,

    // Timing
    pub created_at: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    /// Create a new statistics tracker.
    pub fn new() -> Self {
        Self {
            hits: 0,
            misses: 0,
            produces: 0,
            produce_failures: 0,
            spills: 0,
            spill_failures: 0,
            clean_evictions: 0,
            restores: 0,
            restore_misses: 0,
            registrations: 0,
            updates: 0,
            releases: 0,
            resident_bytes: 0,
            entry_count: 0,
            created_at: Instant::now(),
        }
    }

    /// Fraction of fetches served from memory (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of restores that found a usable spill file (0.0 to 1.0).
    pub fn restore_rate(&self) -> f64 {
        let total = self.restores + self.restore_misses;
        if total == 0 {
            0.0
        } else {
            self.restores as f64 / total as f64
        }
    }

    /// Get the uptime duration since statistics started.
    pub fn uptime(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_produce(&mut self) {
        self.produces += 1;
    }

    pub fn record_produce_failure(&mut self) {
        self.produce_failures += 1;
    }

    pub fn record_spill(&mut self) {
        self.spills += 1;
    }

    pub fn record_spill_failure(&mut self) {
        self.spill_failures += 1;
    }

    /// An eviction that reused an up-to-date spill file.
    pub fn record_clean_eviction(&mut self) {
        self.clean_evictions += 1;
    }

    pub fn record_restore(&mut self) {
        self.restores += 1;
    }

    pub fn record_restore_miss(&mut self) {
        self.restore_misses += 1;
    }

    pub fn record_registration(&mut self) {
        self.registrations += 1;
    }

    pub fn record_update(&mut self) {
        self.updates += 1;
    }

    pub fn record_release(&mut self) {
        self.releases += 1;
    }

    /// Update footprint snapshot values.
    pub fn update_footprint(&mut self, resident_bytes: u64, entry_count: usize) {
        self.resident_bytes = resident_bytes;
        self.entry_count = entry_count;
    }

    /// One-line summary for periodic logging.
    pub fn summary(&self) -> String {
        format!(
            "{} entries, {} resident, hits: {} ({:.1}%), produced: {}, spilled: {} (failed {}), restored: {} (missed {})",
            self.entry_count,
            format_size(self.resident_bytes),
            self.hits,
            self.hit_rate() * 100.0,
            self.produces,
            self.spills,
            self.spill_failures,
            self.restores,
            self.restore_misses
        )
    }
}
