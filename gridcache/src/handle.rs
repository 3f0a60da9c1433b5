//! Per-owner access to a cache entry.
//!
//! A root handle owns one cache entry (registered eagerly from known values,
//! or lazily on first access through its producer). A derived handle is a
//! view onto a root: it never registers or produces anything itself and
//! reads through a weak reference, so it cannot keep a disposed root alive.
//!
//! Dropping a root handle releases its entry; [`CacheHandle::release`] does
//! the same explicitly. Both happen at most once.

use crate::buffer::{compute_ranges, BufferShape, GridBuffer, SampleRange, ShapeError};
use crate::cache::{BufferId, CacheError, GridCache};
use crate::producer::{ProduceError, Producer};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Shared state of a root handle.
struct RootState {
    cache: Arc<GridCache>,
    producer: Option<Arc<dyn Producer>>,
    shape: BufferShape,
    /// Assigned on first access for lazy roots
    id: Mutex<Option<BufferId>>,
    released: AtomicBool,
}

impl RootState {
    fn check_live(&self) -> Result<(), CacheError> {
        if self.released.load(Ordering::Acquire) || self.cache.is_shut_down() {
            return Err(CacheError::Released);
        }
        Ok(())
    }

    /// Entry id, reserving one on first use. Checked against `released`
    /// under the id lock so a concurrent release cannot leak an entry.
    fn ensure_id(&self) -> Result<BufferId, CacheError> {
        let mut id = self.id.lock();
        if self.released.load(Ordering::Acquire) {
            return Err(CacheError::Released);
        }
        Ok(*id.get_or_insert_with(|| self.cache.store().reserve()))
    }

    fn values(&self) -> Result<Arc<GridBuffer>, CacheError> {
        self.check_live()?;
        let id = self.ensure_id()?;
        let store = self.cache.store();
        match &self.producer {
            Some(producer) => store.fetch_or_produce(id, producer.as_ref()),
            None => store.fetch(id)?.ok_or(CacheError::Unrecoverable(id)),
        }
    }

    fn replace(&self, buffer: GridBuffer) -> Result<(), CacheError> {
        self.check_live()?;
        buffer.ensure_shape(self.shape)?;
        let id = self.ensure_id()?;
        self.cache.store().update(id, buffer)
    }

    fn ranges(&self, force: bool) -> Result<Vec<SampleRange>, CacheError> {
        self.check_live()?;
        let id = self.ensure_id()?;
        let store = self.cache.store();
        if force {
            store.invalidate_ranges(id)?;
        }
        if let Some(ranges) = store.ranges(id)? {
            return Ok(ranges);
        }
        let buffer = self.values()?;
        match store.ranges(id)? {
            Some(ranges) => Ok(ranges),
            // Spilled and lost again in between; compute without memoizing
            None => Ok(compute_ranges(&buffer)),
        }
    }

    fn set_ranges(&self, ranges: Vec<SampleRange>) -> Result<(), CacheError> {
        self.check_live()?;
        if ranges.len() != self.shape.bands {
            return Err(ShapeError::Mismatch {
                expected: self.shape,
                actual: BufferShape::new(ranges.len(), self.shape.samples),
            }
            .into());
        }
        let id = self.ensure_id()?;
        // A lazy root is produced first so its ranges attach to real data
        self.values()?;
        self.cache.store().set_ranges(id, ranges)?;
        Ok(())
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(id) = self.id.lock().take() {
            self.cache.release_buffer(id);
            debug!(id = %id, "Root handle released");
        }
    }
}

impl Drop for RootState {
    fn drop(&mut self) {
        self.release();
    }
}

enum HandleKind {
    Root(Arc<RootState>),
    Derived(Weak<RootState>),
}

/// Handle through which an owner reads and writes its buffer.
pub struct CacheHandle {
    kind: HandleKind,
}

impl CacheHandle {
    /// Root handle whose buffer is produced on first access.
    ///
    /// No cache entry exists until the first read or write.
    pub fn lazy(cache: Arc<GridCache>, producer: Arc<dyn Producer>) -> Self {
        let shape = producer.shape();
        Self::root(cache, Some(producer), shape, None)
    }

    /// Root handle registered immediately with known values.
    ///
    /// There is no producer: if the buffer is spilled and its file is lost,
    /// reads fail with [`CacheError::Unrecoverable`].
    pub fn with_values(cache: Arc<GridCache>, buffer: GridBuffer) -> Self {
        let shape = buffer.shape();
        let id = cache.store().register(buffer);
        Self::root(cache, None, shape, Some(id))
    }

    fn root(
        cache: Arc<GridCache>,
        producer: Option<Arc<dyn Producer>>,
        shape: BufferShape,
        id: Option<BufferId>,
    ) -> Self {
        Self {
            kind: HandleKind::Root(Arc::new(RootState {
                cache,
                producer,
                shape,
                id: Mutex::new(id),
                released: AtomicBool::new(false),
            })),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, HandleKind::Root(_))
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.kind, HandleKind::Derived(_))
    }

    fn root_state(&self) -> Result<Arc<RootState>, CacheError> {
        match &self.kind {
            HandleKind::Root(state) => Ok(Arc::clone(state)),
            HandleKind::Derived(weak) => {
                let state = weak.upgrade().ok_or(CacheError::RootReleased)?;
                if state.released.load(Ordering::Acquire) {
                    return Err(CacheError::RootReleased);
                }
                Ok(state)
            }
        }
    }

    /// Identifier of the shared cache entry, `None` for a lazy root that has
    /// not been accessed yet.
    pub fn id(&self) -> Result<Option<BufferId>, CacheError> {
        let state = self.root_state()?;
        let id = *state.id.lock();
        Ok(id)
    }

    /// Declared geometry of the buffer.
    pub fn shape(&self) -> Result<BufferShape, CacheError> {
        Ok(self.root_state()?.shape)
    }

    /// The cache this handle reads from.
    pub fn cache(&self) -> Result<Arc<GridCache>, CacheError> {
        Ok(Arc::clone(&self.root_state()?.cache))
    }

    /// Current buffer: resident, restored from disk, or freshly produced.
    pub fn values(&self) -> Result<Arc<GridBuffer>, CacheError> {
        self.root_state()?.values()
    }

    /// Replace the buffer. Through a derived view this updates the root.
    pub fn replace(&self, buffer: GridBuffer) -> Result<(), CacheError> {
        self.root_state()?.replace(buffer)
    }

    /// Per-band ranges, memoized until the next replace.
    pub fn ranges(&self) -> Result<Vec<SampleRange>, CacheError> {
        self.root_state()?.ranges(false)
    }

    /// Recompute the per-band ranges.
    pub fn refresh_ranges(&self) -> Result<Vec<SampleRange>, CacheError> {
        self.root_state()?.ranges(true)
    }

    /// Pin per-band ranges, one per band. They replace the computed ranges
    /// until the next replace or refresh.
    pub fn set_ranges(&self, ranges: Vec<SampleRange>) -> Result<(), CacheError> {
        self.root_state()?.set_ranges(ranges)
    }

    /// Create a view of this handle's data.
    ///
    /// With `copy`, the current values are cloned into a new independent
    /// root; otherwise the result is a derived handle sharing the entry.
    pub fn derive(&self, copy: bool) -> Result<CacheHandle, CacheError> {
        let state = self.root_state()?;
        if copy {
            let values = state.values()?;
            return Ok(Self::with_values(
                Arc::clone(&state.cache),
                GridBuffer::clone(&values),
            ));
        }
        state.check_live()?;
        Ok(Self {
            kind: HandleKind::Derived(Arc::downgrade(&state)),
        })
    }

    /// Aux metadata attached to the root entry, produced on first request.
    pub fn metadata<T, F>(&self, produce: F) -> Result<Arc<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Result<T, ProduceError>,
    {
        let state = self.root_state()?;
        state.check_live()?;
        let id = state.ensure_id()?;
        state.cache.metadata().get_or_produce(id, produce)
    }

    /// Release the root entry now. A no-op on derived handles and on a root
    /// that was already released.
    pub fn release(&self) {
        if let HandleKind::Root(state) = &self.kind {
            state.release();
        }
    }
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            HandleKind::Root(state) => f
                .debug_struct("CacheHandle::Root")
                .field("id", &*state.id.lock())
                .field("shape", &state.shape)
                .field("lazy", &state.producer.is_some())
                .field("released", &state.released.load(Ordering::Relaxed))
                .finish(),
            HandleKind::Derived(weak) => f
                .debug_struct("CacheHandle::Derived")
                .field("root_alive", &(weak.strong_count() > 0))
                .finish(),
        }
    }
}
