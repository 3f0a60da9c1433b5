//! Per-id cache entry and its state machine.
//!
//! ```text
//!            produce / restore                 spill
//! Missing ───────────────────▶ Resident ───────────────▶ Spilled
//!    ▲                           ▲  │                       │
//!    │                           │  └── update (dirty) ─────┤
//!    └──── restore miss ─────────┴────── restore ◀──────────┘
//! ```
//!
//! `Producing` only exists while a producer runs under the entry lock.

use crate::buffer::{BufferShape, GridBuffer, SampleRange};
use crate::cache::types::EntryState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where the entry's buffer currently lives.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Resident(Arc<GridBuffer>),
    Spilled,
    Producing,
    Missing,
}

/// Mutable state of one cache entry. Always accessed under its cell's lock.
#[derive(Debug)]
pub(crate) struct CacheEntry {
    slot: Slot,
    /// Last fetch, update or registration
    last_access: Instant,
    /// Resident buffer differs from (or has no) spill file
    dirty: bool,
    /// A spill file exists for this id
    on_disk: bool,
    /// Memoized per-band ranges of the current buffer
    ranges: Option<Vec<SampleRange>>,
    /// Geometry of the current buffer, kept while spilled
    shape: Option<BufferShape>,
    /// Bumped on every update
    generation: u64,
    /// Set once the entry has been released; later accesses fail
    released: bool,
}

impl CacheEntry {
    /// Entry holding a freshly registered buffer.
    pub(crate) fn resident(buffer: Arc<GridBuffer>) -> Self {
        let shape = buffer.shape();
        Self {
            slot: Slot::Resident(buffer),
            last_access: Instant::now(),
            dirty: true,
            on_disk: false,
            ranges: None,
            shape: Some(shape),
            generation: 0,
            released: false,
        }
    }

    /// Entry reserved for a buffer that will be produced later.
    pub(crate) fn missing() -> Self {
        Self {
            slot: Slot::Missing,
            last_access: Instant::now(),
            dirty: false,
            on_disk: false,
            ranges: None,
            shape: None,
            generation: 0,
            released: false,
        }
    }

    pub(crate) fn state(&self) -> EntryState {
        match self.slot {
            Slot::Resident(_) => EntryState::Resident,
            Slot::Spilled => EntryState::Spilled,
            Slot::Producing => EntryState::Producing,
            Slot::Missing => EntryState::Missing,
        }
    }

    pub(crate) fn slot(&self) -> &Slot {
        &self.slot
    }

    /// Resident buffer, if any.
    pub(crate) fn buffer(&self) -> Option<&Arc<GridBuffer>> {
        match &self.slot {
            Slot::Resident(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Bytes this entry currently holds in memory.
    pub(crate) fn resident_bytes(&self) -> u64 {
        self.buffer().map_or(0, |b| b.size_bytes())
    }

    pub(crate) fn shape(&self) -> Option<BufferShape> {
        self.shape
    }

    pub(crate) fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    pub(crate) fn last_access(&self) -> Instant {
        self.last_access
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn is_on_disk(&self) -> bool {
        self.on_disk
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn ranges(&self) -> Option<&[SampleRange]> {
        self.ranges.as_deref()
    }

    pub(crate) fn set_ranges(&mut self, ranges: Vec<SampleRange>) {
        self.ranges = Some(ranges);
    }

    pub(crate) fn clear_ranges(&mut self) {
        self.ranges = None;
    }

    /// Install a newly produced buffer. Returns the change in resident bytes.
    pub(crate) fn install_produced(&mut self, buffer: Arc<GridBuffer>) -> i64 {
        let before = self.resident_bytes();
        self.shape = Some(buffer.shape());
        self.slot = Slot::Resident(buffer);
        self.dirty = true;
        self.ranges = None;
        self.touch();
        delta(before, self.resident_bytes())
    }

    /// Install a buffer read back from its spill file. The file stays valid.
    pub(crate) fn install_restored(&mut self, buffer: Arc<GridBuffer>) -> i64 {
        let before = self.resident_bytes();
        self.slot = Slot::Resident(buffer);
        self.dirty = false;
        self.on_disk = true;
        self.touch();
        delta(before, self.resident_bytes())
    }

    /// Replace the buffer in memory. Any spill file becomes stale.
    pub(crate) fn replace(&mut self, buffer: Arc<GridBuffer>) -> i64 {
        let before = self.resident_bytes();
        self.shape = Some(buffer.shape());
        self.slot = Slot::Resident(buffer);
        self.dirty = true;
        self.ranges = None;
        self.generation += 1;
        self.touch();
        delta(before, self.resident_bytes())
    }

    /// Mark the buffer as safely on disk and drop it from memory.
    ///
    /// Callers must have written (or verified) the spill file first.
    pub(crate) fn mark_spilled(&mut self) -> i64 {
        let before = self.resident_bytes();
        self.slot = Slot::Spilled;
        self.dirty = false;
        self.on_disk = true;
        delta(before, 0)
    }

    /// The spill file is gone or unreadable.
    pub(crate) fn mark_lost(&mut self) -> i64 {
        let before = self.resident_bytes();
        self.slot = Slot::Missing;
        self.on_disk = false;
        self.dirty = false;
        delta(before, 0)
    }

    pub(crate) fn begin_produce(&mut self) {
        self.slot = Slot::Producing;
    }

    /// Producer failed; the entry holds nothing.
    pub(crate) fn abort_produce(&mut self) {
        self.slot = Slot::Missing;
    }

    /// Release the entry. Returns the change in resident bytes.
    pub(crate) fn release(&mut self) -> i64 {
        let before = self.resident_bytes();
        self.slot = Slot::Missing;
        self.ranges = None;
        self.released = true;
        delta(before, 0)
    }
}

fn delta(before: u64, after: u64) -> i64 {
    after as i64 - before as i64
}

/// A cache entry plus a lock-free flag mirroring `Slot::Producing`, so
/// observers can see a running producer without waiting for the entry lock.
#[derive(Debug)]
pub(crate) struct EntryCell {
    pub(crate) entry: parking_lot::Mutex<CacheEntry>,
    producing: AtomicBool,
}

impl EntryCell {
    pub(crate) fn new(entry: CacheEntry) -> Self {
        Self {
            entry: parking_lot::Mutex::new(entry),
            producing: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_producing(&self) -> bool {
        self.producing.load(Ordering::Acquire)
    }

    /// Raise the producing flag until the returned guard drops.
    pub(crate) fn producing_guard(&self) -> ProducingGuard<'_> {
        self.producing.store(true, Ordering::Release);
        ProducingGuard { cell: self }
    }
}

/// Clears the producing flag on drop, including when the producer panics.
pub(crate) struct ProducingGuard<'a> {
    cell: &'a EntryCell,
}

impl Drop for ProducingGuard<'_> {
    fn drop(&mut self) {
        self.cell.producing.store(false, Ordering::Release);
    }
}
