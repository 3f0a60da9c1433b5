//! The buffer store: identifiers to lazily materialized grid buffers.
//!
//! Entries live in a [`DashMap`] keyed by [`BufferId`]. Each value is an
//! `Arc<EntryCell>` with its own mutex; the `Arc` is cloned out of the map
//! before the entry lock is taken, so no entry lock is ever held while a map
//! shard is locked.
//!
//! A miss on an entry is resolved in order: resident buffer, spill file,
//! producer. The producer runs while the entry lock is held, so concurrent
//! misses on one id produce exactly once while other ids proceed in
//! parallel.

use crate::buffer::{compute_ranges, BufferShape, GridBuffer, SampleRange, ShapeError};
use crate::cache::entry::{CacheEntry, EntryCell, Slot};
use crate::cache::policy::{EvictionPolicy, HousekeepingReport, SpillCandidate};
use crate::cache::spill::SpillManager;
use crate::cache::stats::CacheStats;
use crate::cache::types::{BufferId, CacheError, EntryState};
use crate::config::{format_size, CacheConfig};
use crate::producer::Producer;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of trying to spill one entry.
enum SpillOutcome {
    Spilled(u64),
    Skipped,
    Failed,
}

/// Why an entry is being spilled.
#[derive(Clone, Copy)]
enum SpillReason {
    Idle(Duration),
    Budget,
}

/// Thread-safe map from [`BufferId`] to cache entries.
pub struct BufferStore {
    entries: DashMap<BufferId, Arc<EntryCell>>,
    resident_bytes: AtomicU64,
    spill: Arc<SpillManager>,
    policy: EvictionPolicy,
    stats: Mutex<CacheStats>,
    /// Serializes housekeeping passes
    housekeeping: Mutex<()>,
}

impl BufferStore {
    /// Create a store spilling through `spill` under `policy`.
    pub fn new(spill: Arc<SpillManager>, policy: EvictionPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            resident_bytes: AtomicU64::new(0),
            spill,
            policy,
            stats: Mutex::new(CacheStats::new()),
            housekeeping: Mutex::new(()),
        }
    }

    /// Create a store and its spill session from a configuration.
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let spill = Arc::new(SpillManager::new(config.spill_directory())?);
        Ok(Self::new(spill, EvictionPolicy::from_config(config)))
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    pub fn spill_manager(&self) -> &Arc<SpillManager> {
        &self.spill
    }

    /// Store a buffer resident and return its fresh identifier.
    pub fn register(&self, buffer: GridBuffer) -> BufferId {
        let id = BufferId::mint();
        let buffer = Arc::new(buffer);
        let bytes = buffer.size_bytes();
        self.entries
            .insert(id, Arc::new(EntryCell::new(CacheEntry::resident(buffer))));
        self.adjust_resident(bytes as i64);
        self.stats.lock().record_registration();
        debug!(id = %id, bytes, "Buffer registered");
        self.enforce_budget();
        id
    }

    /// Create an empty entry for a buffer that will be produced on first access.
    pub fn reserve(&self) -> BufferId {
        let id = BufferId::mint();
        self.entries
            .insert(id, Arc::new(EntryCell::new(CacheEntry::missing())));
        self.stats.lock().record_registration();
        debug!(id = %id, "Buffer reserved");
        id
    }

    /// Return the buffer if it is resident or can be restored from its spill
    /// file. `Ok(None)` is a miss.
    pub fn fetch(&self, id: BufferId) -> Result<Option<Arc<GridBuffer>>, CacheError> {
        let cell = self.cell(id)?;
        let (buffer, restored) = {
            let mut entry = cell.entry.lock();
            if entry.is_released() {
                return Err(CacheError::UnknownBuffer(id));
            }
            self.load_locked(id, &mut entry)
        };
        if restored {
            self.enforce_budget();
        }
        Ok(buffer)
    }

    /// Like [`fetch`](Self::fetch), but runs `producer` on a miss.
    ///
    /// The producer runs with the entry locked; concurrent callers for the
    /// same id wait and then see the produced buffer. Its result must match
    /// `producer.shape()`.
    pub fn fetch_or_produce(
        &self,
        id: BufferId,
        producer: &dyn Producer,
    ) -> Result<Arc<GridBuffer>, CacheError> {
        let cell = self.cell(id)?;
        let buffer = {
            let mut entry = cell.entry.lock();
            if entry.is_released() {
                return Err(CacheError::UnknownBuffer(id));
            }
            match self.load_locked(id, &mut entry).0 {
                Some(buffer) => buffer,
                None => self.produce_locked(id, &cell, &mut entry, producer)?,
            }
        };
        self.enforce_budget();
        Ok(buffer)
    }

    /// Replace the buffer of an entry. No I/O happens here; a stale spill
    /// file is rewritten on the next spill.
    pub fn update(&self, id: BufferId, buffer: GridBuffer) -> Result<(), CacheError> {
        let cell = self.cell(id)?;
        let mut entry = cell.entry.lock();
        if entry.is_released() {
            return Err(CacheError::UnknownBuffer(id));
        }
        let bytes = buffer.size_bytes();
        let delta = entry.replace(Arc::new(buffer));
        self.adjust_resident(delta);
        self.stats.lock().record_update();
        debug!(id = %id, bytes, generation = entry.generation(), "Buffer updated");
        Ok(())
    }

    /// Remove an entry and its spill file.
    ///
    /// Returns `false` if the id was not registered (including a second
    /// release of the same id).
    pub fn release(&self, id: BufferId) -> bool {
        let Some((_, cell)) = self.entries.remove(&id) else {
            return false;
        };
        let delta = cell.entry.lock().release();
        self.adjust_resident(delta);
        self.spill.delete_spill(id);
        self.stats.lock().record_release();
        debug!(id = %id, "Buffer released");
        true
    }

    /// Release every entry. Returns the number released.
    pub fn release_all(&self) -> usize {
        let ids: Vec<BufferId> = self.entries.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.release(*id)).count()
    }

    /// Number of registered entries.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Time since the entry was last accessed.
    pub fn idle_since(&self, id: BufferId) -> Result<Duration, CacheError> {
        let cell = self.cell(id)?;
        let idle = cell.entry.lock().idle_for(Instant::now());
        Ok(idle)
    }

    /// Current state of an entry. Does not wait for a running producer.
    pub fn state(&self, id: BufferId) -> Result<EntryState, CacheError> {
        let cell = self.cell(id)?;
        if cell.is_producing() {
            return Ok(EntryState::Producing);
        }
        let state = cell.entry.lock().state();
        Ok(state)
    }

    /// Aggregate bytes held in memory by all entries.
    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes.load(Ordering::Acquire)
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.lock().clone();
        stats.update_footprint(self.resident_bytes(), self.size());
        stats
    }

    /// Per-band ranges of the current buffer, computed once and memoized.
    ///
    /// Restores from the spill file if needed. `Ok(None)` when the entry
    /// holds no data.
    pub fn ranges(&self, id: BufferId) -> Result<Option<Vec<SampleRange>>, CacheError> {
        let cell = self.cell(id)?;
        let (ranges, restored) = {
            let mut entry = cell.entry.lock();
            if entry.is_released() {
                return Err(CacheError::UnknownBuffer(id));
            }
            if let Some(ranges) = entry.ranges() {
                return Ok(Some(ranges.to_vec()));
            }
            match self.load_locked(id, &mut entry) {
                (Some(buffer), restored) => {
                    let ranges = compute_ranges(&buffer);
                    entry.set_ranges(ranges.clone());
                    (Some(ranges), restored)
                }
                (None, _) => (None, false),
            }
        };
        if restored {
            self.enforce_budget();
        }
        Ok(ranges)
    }

    /// Pin caller-supplied per-band ranges. They are served by
    /// [`ranges`](Self::ranges) until the next update or invalidation.
    ///
    /// Returns `Ok(false)` for an entry that has never held data, where there
    /// is nothing to attach the ranges to.
    pub fn set_ranges(&self, id: BufferId, ranges: Vec<SampleRange>) -> Result<bool, CacheError> {
        let cell = self.cell(id)?;
        let mut entry = cell.entry.lock();
        if entry.is_released() {
            return Err(CacheError::UnknownBuffer(id));
        }
        let Some(shape) = entry.shape() else {
            return Ok(false);
        };
        if ranges.len() != shape.bands {
            return Err(ShapeError::Mismatch {
                expected: shape,
                actual: BufferShape::new(ranges.len(), shape.samples),
            }
            .into());
        }
        entry.set_ranges(ranges);
        Ok(true)
    }

    /// Drop memoized ranges so the next [`ranges`](Self::ranges) recomputes.
    pub fn invalidate_ranges(&self, id: BufferId) -> Result<(), CacheError> {
        let cell = self.cell(id)?;
        cell.entry.lock().clear_ranges();
        Ok(())
    }

    /// Run one housekeeping pass: spill idle entries, then spill least
    /// recently used entries while over budget.
    pub fn housekeep(&self) -> HousekeepingReport {
        let _pass = self.housekeeping.lock();
        let mut report = HousekeepingReport::default();

        if let Some(delay) = self.policy.idle_clear_delay {
            let now = Instant::now();
            let candidates = self.spill_candidates();
            for id in self.policy.select_idle(&candidates, now) {
                match self.spill_one(id, SpillReason::Idle(delay)) {
                    SpillOutcome::Spilled(bytes) => {
                        report.idle_spilled += 1;
                        report.bytes_freed += bytes;
                    }
                    SpillOutcome::Skipped => report.skipped += 1,
                    SpillOutcome::Failed => report.failed += 1,
                }
            }
        }

        self.spill_for_budget(&mut report);

        if !report.is_empty() {
            info!(
                idle = report.idle_spilled,
                budget = report.budget_spilled,
                skipped = report.skipped,
                failed = report.failed,
                freed = %format_size(report.bytes_freed),
                resident = %format_size(self.resident_bytes()),
                "Housekeeping pass complete"
            );
        }
        report
    }

    /// Spill least recently used entries if resident bytes exceed the budget.
    ///
    /// Skips silently when another pass is already running.
    pub fn enforce_budget(&self) -> HousekeepingReport {
        let mut report = HousekeepingReport::default();
        if !self.policy.over_budget(self.resident_bytes()) {
            return report;
        }
        let Some(_pass) = self.housekeeping.try_lock() else {
            return report;
        };
        self.spill_for_budget(&mut report);
        if report.spilled() > 0 {
            debug!(
                spilled = report.budget_spilled,
                freed = report.bytes_freed,
                resident = self.resident_bytes(),
                "Resident budget enforced"
            );
        }
        report
    }

    /// Spill one entry now, regardless of policy. Returns whether it left
    /// memory. Entries below the minimum spill size stay resident.
    pub fn spill_entry(&self, id: BufferId) -> Result<bool, CacheError> {
        let cell = self.cell(id)?;
        let mut entry = cell.entry.lock();
        if entry.is_released() {
            return Err(CacheError::UnknownBuffer(id));
        }
        if !self.policy.is_spillable(entry.resident_bytes()) {
            return Ok(false);
        }
        Ok(matches!(
            self.spill_locked(id, &mut entry),
            SpillOutcome::Spilled(_)
        ))
    }

    fn spill_for_budget(&self, report: &mut HousekeepingReport) {
        if !self.policy.over_budget(self.resident_bytes()) {
            return;
        }
        let candidates = self.spill_candidates();
        for id in self
            .policy
            .select_for_budget(&candidates, self.resident_bytes())
        {
            match self.spill_one(id, SpillReason::Budget) {
                SpillOutcome::Spilled(bytes) => {
                    report.budget_spilled += 1;
                    report.bytes_freed += bytes;
                }
                SpillOutcome::Skipped => report.skipped += 1,
                SpillOutcome::Failed => report.failed += 1,
            }
            if let Some(target) = self.policy.budget_target() {
                if self.resident_bytes() <= target {
                    break;
                }
            }
        }
    }

    /// Snapshot resident entries. Busy entries are left out.
    fn spill_candidates(&self) -> Vec<SpillCandidate> {
        let cells: Vec<(BufferId, Arc<EntryCell>)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();

        cells
            .into_iter()
            .filter_map(|(id, cell)| {
                let entry = cell.entry.try_lock()?;
                if entry.is_released() || entry.buffer().is_none() {
                    return None;
                }
                Some(SpillCandidate {
                    id,
                    last_access: entry.last_access(),
                    size_bytes: entry.resident_bytes(),
                })
            })
            .collect()
    }

    /// Spill a selected entry if it is still eligible.
    fn spill_one(&self, id: BufferId, reason: SpillReason) -> SpillOutcome {
        let Ok(cell) = self.cell(id) else {
            return SpillOutcome::Skipped;
        };
        let Some(mut entry) = cell.entry.try_lock() else {
            return SpillOutcome::Skipped;
        };
        if entry.is_released() {
            return SpillOutcome::Skipped;
        }
        if let SpillReason::Idle(delay) = reason {
            if entry.idle_for(Instant::now()) < delay {
                return SpillOutcome::Skipped;
            }
        }
        self.spill_locked(id, &mut entry)
    }

    fn spill_locked(&self, id: BufferId, entry: &mut CacheEntry) -> SpillOutcome {
        let Some(buffer) = entry.buffer().cloned() else {
            return SpillOutcome::Skipped;
        };

        if entry.is_on_disk() && !entry.is_dirty() {
            self.stats.lock().record_clean_eviction();
            debug!(id = %id, "Evicting clean buffer, spill file is current");
        } else if let Err(e) = self.spill.spill(id, &buffer) {
            warn!(id = %id, error = %e, "Spill failed, buffer stays resident");
            self.stats.lock().record_spill_failure();
            return SpillOutcome::Failed;
        } else {
            self.stats.lock().record_spill();
        }

        let delta = entry.mark_spilled();
        self.adjust_resident(delta);
        SpillOutcome::Spilled(delta.unsigned_abs())
    }

    /// Resident hit or restore from spill. Returns the buffer and whether it
    /// was restored.
    fn load_locked(
        &self,
        id: BufferId,
        entry: &mut CacheEntry,
    ) -> (Option<Arc<GridBuffer>>, bool) {
        if let Some(buffer) = entry.buffer().cloned() {
            entry.touch();
            self.stats.lock().record_hit();
            return (Some(buffer), false);
        }

        match entry.slot() {
            Slot::Spilled => {
                let restored = self.restore_locked(id, entry);
                let was_restored = restored.is_some();
                (restored, was_restored)
            }
            Slot::Producing => {
                // A producer that unwound without finishing
                entry.abort_produce();
                self.stats.lock().record_miss();
                (None, false)
            }
            Slot::Missing | Slot::Resident(_) => {
                self.stats.lock().record_miss();
                (None, false)
            }
        }
    }

    fn restore_locked(&self, id: BufferId, entry: &mut CacheEntry) -> Option<Arc<GridBuffer>> {
        let restored = self.spill.restore(id).filter(|buffer| {
            let matches = entry.shape().map_or(true, |shape| shape == buffer.shape());
            if !matches {
                warn!(id = %id, "Spill file shape does not match entry, discarding");
                self.spill.delete_spill(id);
            }
            matches
        });

        match restored {
            Some(buffer) => {
                let buffer = Arc::new(buffer);
                let delta = entry.install_restored(Arc::clone(&buffer));
                self.adjust_resident(delta);
                self.stats.lock().record_restore();
                Some(buffer)
            }
            None => {
                let delta = entry.mark_lost();
                self.adjust_resident(delta);
                let mut stats = self.stats.lock();
                stats.record_restore_miss();
                stats.record_miss();
                None
            }
        }
    }

    fn produce_locked(
        &self,
        id: BufferId,
        cell: &EntryCell,
        entry: &mut CacheEntry,
        producer: &dyn Producer,
    ) -> Result<Arc<GridBuffer>, CacheError> {
        let label = producer.label();
        let _producing = cell.producing_guard();
        entry.begin_produce();
        debug!(id = %id, producer = %label, "Running producer");

        let started = Instant::now();
        let buffer = match producer.produce() {
            Ok(buffer) => buffer,
            Err(source) => {
                entry.abort_produce();
                self.stats.lock().record_produce_failure();
                debug!(id = %id, producer = %label, error = %source, "Producer failed");
                return Err(CacheError::Produce { label, source });
            }
        };
        if let Err(e) = buffer.ensure_shape(producer.shape()) {
            entry.abort_produce();
            self.stats.lock().record_produce_failure();
            debug!(id = %id, producer = %label, error = %e, "Produced buffer has wrong shape");
            return Err(e.into());
        }

        let buffer = Arc::new(buffer);
        let delta = entry.install_produced(Arc::clone(&buffer));
        self.adjust_resident(delta);
        self.stats.lock().record_produce();
        debug!(
            id = %id,
            producer = %label,
            bytes = buffer.size_bytes(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Buffer produced"
        );
        Ok(buffer)
    }

    fn cell(&self, id: BufferId) -> Result<Arc<EntryCell>, CacheError> {
        self.entries
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(CacheError::UnknownBuffer(id))
    }

    fn adjust_resident(&self, delta: i64) {
        if delta >= 0 {
            self.resident_bytes
                .fetch_add(delta as u64, Ordering::AcqRel);
        } else {
            self.resident_bytes
                .fetch_sub(delta.unsigned_abs(), Ordering::AcqRel);
        }
    }
}

impl std::fmt::Debug for BufferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferStore")
            .field("entries", &self.entries.len())
            .field("resident_bytes", &self.resident_bytes())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferShape;
    use crate::producer::{FnProducer, ProduceError};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn unbounded_policy() -> EvictionPolicy {
        EvictionPolicy {
            idle_clear_delay: None,
            resident_budget: None,
            budget_target_ratio: 1.0,
            min_spill_bytes: 0,
        }
    }

    fn create_store(policy: EvictionPolicy) -> (BufferStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let spill = Arc::new(SpillManager::new(temp_dir.path()).unwrap());
        (BufferStore::new(spill, policy), temp_dir)
    }

    fn buffer(value: f32, samples: usize) -> GridBuffer {
        GridBuffer::filled(BufferShape::new(1, samples), value)
    }

    #[test]
    fn test_register_then_fetch() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = store.register(buffer(3.0, 4));

        let fetched = store.fetch(id).unwrap().unwrap();
        assert_eq!(*fetched, buffer(3.0, 4));
        assert_eq!(store.size(), 1);
        assert_eq!(store.resident_bytes(), 16);
        assert_eq!(store.state(id).unwrap(), EntryState::Resident);
    }

    #[test]
    fn test_unknown_id_is_error() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = BufferId::from_raw(u64::MAX);
        assert!(matches!(store.fetch(id), Err(CacheError::UnknownBuffer(_))));
        assert!(matches!(
            store.update(id, buffer(0.0, 1)),
            Err(CacheError::UnknownBuffer(_))
        ));
    }

    #[test]
    fn test_reserved_entry_misses() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = store.reserve();
        assert!(store.fetch(id).unwrap().is_none());
        assert_eq!(store.state(id).unwrap(), EntryState::Missing);
        assert!(store.ranges(id).unwrap().is_none());
    }

    #[test]
    fn test_fetch_or_produce_runs_producer_once() {
        let (store, _temp) = create_store(unbounded_policy());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let producer = FnProducer::new("ramp", BufferShape::new(1, 3), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(GridBuffer::new(vec![vec![1.0, 2.0, 3.0]])?)
        });
        let id = store.reserve();

        let first = store.fetch_or_produce(id, &producer).unwrap();
        let second = store.fetch_or_produce(id, &producer).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().produces, 1);
    }

    #[test]
    fn test_concurrent_misses_produce_once() {
        let (store, _temp) = create_store(unbounded_policy());
        let store = Arc::new(store);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let producer = Arc::new(FnProducer::new("slow", BufferShape::new(1, 2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok(GridBuffer::new(vec![vec![4.0, 5.0]])?)
        }));
        let id = store.reserve();
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let producer = Arc::clone(&producer);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.fetch_or_produce(id, producer.as_ref()).unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in &results {
            assert_eq!(result.band(0), Some(&[4.0, 5.0][..]));
        }
    }

    #[test]
    fn test_producer_error_propagates_and_is_not_cached() {
        let (store, _temp) = create_store(unbounded_policy());
        let producer = FnProducer::new("offline", BufferShape::new(1, 1), || {
            Err(ProduceError::Source("server down".to_string()))
        });
        let id = store.reserve();

        let err = store.fetch_or_produce(id, &producer).unwrap_err();
        assert!(matches!(err, CacheError::Produce { ref label, .. } if label == "offline"));
        assert_eq!(store.state(id).unwrap(), EntryState::Missing);
        assert_eq!(store.stats().produce_failures, 1);
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let (store, _temp) = create_store(unbounded_policy());
        let producer = FnProducer::new("short", BufferShape::new(1, 4), || {
            Ok(GridBuffer::new(vec![vec![1.0, 2.0]])?)
        });
        let id = store.reserve();

        let err = store.fetch_or_produce(id, &producer).unwrap_err();
        assert!(matches!(err, CacheError::Shape(_)));
        assert_eq!(store.resident_bytes(), 0);
    }

    #[test]
    fn test_panicking_producer_leaves_entry_missing() {
        let (store, _temp) = create_store(unbounded_policy());
        let store = Arc::new(store);
        let id = store.reserve();

        let panicking = Arc::clone(&store);
        let result = thread::spawn(move || {
            let producer = FnProducer::new(
                "panics",
                BufferShape::new(1, 1),
                || -> Result<GridBuffer, ProduceError> { panic!("producer exploded") },
            );
            let _ = panicking.fetch_or_produce(id, &producer);
        })
        .join();
        assert!(result.is_err());

        assert_eq!(store.state(id).unwrap(), EntryState::Producing);
        assert!(store.fetch(id).unwrap().is_none());
        assert_eq!(store.state(id).unwrap(), EntryState::Missing);

        let producer = FnProducer::new("works", BufferShape::new(1, 1), || {
            Ok(GridBuffer::new(vec![vec![7.0]])?)
        });
        assert_eq!(store.fetch_or_produce(id, &producer).unwrap().sample(0), Some(vec![7.0]));
    }

    #[test]
    fn test_update_replaces_and_invalidates_ranges() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = store.register(GridBuffer::new(vec![vec![1.0, 2.0, 3.0, 4.0]]).unwrap());
        assert_eq!(
            store.ranges(id).unwrap().unwrap(),
            vec![SampleRange::new(1.0, 4.0)]
        );

        store.update(id, GridBuffer::new(vec![vec![0.0, 0.0, 9.0, 9.0]]).unwrap()).unwrap();

        assert_eq!(store.fetch(id).unwrap().unwrap().band(0), Some(&[0.0, 0.0, 9.0, 9.0][..]));
        assert_eq!(
            store.ranges(id).unwrap().unwrap(),
            vec![SampleRange::new(0.0, 9.0)]
        );
    }

    #[test]
    fn test_set_ranges_until_next_update() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = store.register(GridBuffer::new(vec![vec![1.0, 2.0]]).unwrap());
        let pinned = vec![SampleRange::new(-100.0, 100.0)];

        assert!(store.set_ranges(id, pinned.clone()).unwrap());
        assert_eq!(store.ranges(id).unwrap().unwrap(), pinned);

        // Pinned ranges survive a spill
        store.spill_entry(id).unwrap();
        assert_eq!(store.ranges(id).unwrap().unwrap(), pinned);

        store.update(id, GridBuffer::new(vec![vec![3.0, 4.0]]).unwrap()).unwrap();
        assert_eq!(
            store.ranges(id).unwrap().unwrap(),
            vec![SampleRange::new(3.0, 4.0)]
        );
    }

    #[test]
    fn test_set_ranges_checks_band_count() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = store.register(buffer(1.0, 4));

        let err = store
            .set_ranges(id, vec![SampleRange::new(0.0, 1.0); 2])
            .unwrap_err();
        assert!(matches!(err, CacheError::Shape(ShapeError::Mismatch { .. })));

        let reserved = store.reserve();
        assert!(!store.set_ranges(reserved, Vec::new()).unwrap());
        assert!(store.ranges(reserved).unwrap().is_none());
    }

    #[test]
    fn test_spill_and_restore_is_bit_exact() {
        let (store, _temp) = create_store(unbounded_policy());
        let nan = f32::from_bits(0x7fc0_0042);
        let original = GridBuffer::new(vec![vec![nan, -0.0, 1.0e-40, 3.5]]).unwrap();
        let id = store.register(original.clone());

        assert!(store.spill_entry(id).unwrap());
        assert_eq!(store.state(id).unwrap(), EntryState::Spilled);
        assert_eq!(store.resident_bytes(), 0);

        let restored = store.fetch(id).unwrap().unwrap();
        let bits = |b: &GridBuffer| b.bands()[0].iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&restored), bits(&original));
        assert_eq!(store.stats().restores, 1);
    }

    #[test]
    fn test_clean_entry_is_not_rewritten() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = store.register(buffer(1.0, 8));

        store.spill_entry(id).unwrap();
        store.fetch(id).unwrap();
        store.spill_entry(id).unwrap();

        let stats = store.stats();
        assert_eq!(stats.spills, 1);
        assert_eq!(stats.clean_evictions, 1);
    }

    #[test]
    fn test_dirty_entry_is_rewritten() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = store.register(buffer(1.0, 8));
        store.spill_entry(id).unwrap();
        store.update(id, buffer(2.0, 8)).unwrap();
        store.spill_entry(id).unwrap();

        assert_eq!(store.stats().spills, 2);
        assert_eq!(*store.fetch(id).unwrap().unwrap(), buffer(2.0, 8));
    }

    #[test]
    fn test_lost_spill_file_is_miss() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = store.register(buffer(1.0, 8));
        store.spill_entry(id).unwrap();
        std::fs::remove_file(store.spill_manager().path_for(id)).unwrap();

        assert!(store.fetch(id).unwrap().is_none());
        assert_eq!(store.state(id).unwrap(), EntryState::Missing);
        assert_eq!(store.stats().restore_misses, 1);
    }

    #[test]
    fn test_corrupt_spill_header_is_miss() {
        use byteorder::{LittleEndian, WriteBytesExt};

        let (store, _temp) = create_store(unbounded_policy());
        let id = store.reserve();
        let producer = FnProducer::new("constant", BufferShape::new(1, 8), || {
            Ok(buffer(6.0, 8))
        });
        store.fetch_or_produce(id, &producer).unwrap();
        assert!(store.spill_entry(id).unwrap());

        // Header claims 8 bands of u64::MAX / 4 samples
        let mut bytes = crate::cache::codec::SPILL_MAGIC.to_vec();
        bytes.write_u32::<LittleEndian>(8).unwrap();
        bytes.write_u64::<LittleEndian>(u64::MAX / 4).unwrap();
        bytes.extend_from_slice(&[0u8; 32]);
        std::fs::write(store.spill_manager().path_for(id), bytes).unwrap();

        assert!(store.fetch(id).unwrap().is_none());
        assert_eq!(store.stats().restore_misses, 1);
        assert_eq!(*store.fetch_or_produce(id, &producer).unwrap(), buffer(6.0, 8));
        assert_eq!(store.stats().produces, 2);
    }

    #[test]
    fn test_failed_spill_keeps_entry_resident() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = store.register(buffer(4.0, 8));
        store.spill_manager().purge();

        assert!(!store.spill_entry(id).unwrap());
        assert_eq!(store.state(id).unwrap(), EntryState::Resident);
        assert_eq!(store.resident_bytes(), 32);
        assert_eq!(store.stats().spill_failures, 1);
        assert_eq!(*store.fetch(id).unwrap().unwrap(), buffer(4.0, 8));
    }

    #[test]
    fn test_failed_budget_spill_is_reported() {
        let policy = EvictionPolicy {
            resident_budget: Some(16),
            budget_target_ratio: 1.0,
            ..unbounded_policy()
        };
        let (store, _temp) = create_store(policy);
        store.spill_manager().purge();

        // Budget enforcement on register already fails once
        let id = store.register(buffer(4.0, 8));
        assert_eq!(store.state(id).unwrap(), EntryState::Resident);

        let report = store.housekeep();
        assert_eq!(report.failed, 1);
        assert_eq!(report.spilled(), 0);
        assert_eq!(store.state(id).unwrap(), EntryState::Resident);
        assert_eq!(store.stats().spill_failures, 2);
        assert_eq!(*store.fetch(id).unwrap().unwrap(), buffer(4.0, 8));
    }

    #[test]
    fn test_small_buffers_stay_resident() {
        let policy = EvictionPolicy {
            min_spill_bytes: 1024,
            ..unbounded_policy()
        };
        let (store, _temp) = create_store(policy);
        let id = store.register(buffer(1.0, 4));

        assert!(!store.spill_entry(id).unwrap());
        assert_eq!(store.state(id).unwrap(), EntryState::Resident);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (store, _temp) = create_store(unbounded_policy());
        let id = store.register(buffer(1.0, 8));
        store.spill_entry(id).unwrap();
        let path = store.spill_manager().path_for(id);
        assert!(path.exists());

        assert!(store.release(id));
        assert!(!store.release(id));
        assert!(!path.exists());
        assert_eq!(store.size(), 0);
        assert_eq!(store.resident_bytes(), 0);
        assert!(matches!(store.fetch(id), Err(CacheError::UnknownBuffer(_))));
    }

    #[test]
    fn test_housekeep_spills_idle_entries() {
        let policy = EvictionPolicy {
            idle_clear_delay: Some(Duration::from_millis(20)),
            ..unbounded_policy()
        };
        let (store, _temp) = create_store(policy);
        let id = store.register(buffer(5.0, 16));

        thread::sleep(Duration::from_millis(40));
        let report = store.housekeep();

        assert_eq!(report.idle_spilled, 1);
        assert_eq!(report.bytes_freed, 64);
        assert_eq!(store.state(id).unwrap(), EntryState::Spilled);
        assert_eq!(*store.fetch(id).unwrap().unwrap(), buffer(5.0, 16));
    }

    #[test]
    fn test_budget_spills_least_recently_used() {
        let policy = EvictionPolicy {
            resident_budget: Some(100),
            budget_target_ratio: 1.0,
            ..unbounded_policy()
        };
        let (store, _temp) = create_store(policy);

        let oldest = store.register(buffer(1.0, 10));
        thread::sleep(Duration::from_millis(5));
        let middle = store.register(buffer(2.0, 10));
        thread::sleep(Duration::from_millis(5));
        store.fetch(oldest).unwrap();
        thread::sleep(Duration::from_millis(5));
        // 120 bytes resident, over the 100 byte budget
        let newest = store.register(buffer(3.0, 10));

        assert_eq!(store.state(middle).unwrap(), EntryState::Spilled);
        assert_eq!(store.state(oldest).unwrap(), EntryState::Resident);
        assert_eq!(store.state(newest).unwrap(), EntryState::Resident);
        assert_eq!(store.resident_bytes(), 80);
    }

    #[test]
    fn test_release_all() {
        let (store, _temp) = create_store(unbounded_policy());
        store.register(buffer(1.0, 2));
        store.register(buffer(2.0, 2));
        store.reserve();

        assert_eq!(store.release_all(), 3);
        assert_eq!(store.size(), 0);
        assert_eq!(store.stats().releases, 3);
    }
}
