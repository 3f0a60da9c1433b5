//! The contract shared by every data object backed by a cache entry.
//!
//! A concrete owner supplies its [`CacheHandle`] and knows how to rebuild
//! itself around another handle; everything else (reads, replaces, views,
//! ranges, per-sample access) is provided here.

use crate::buffer::{BufferShape, GridBuffer, SampleRange};
use crate::cache::CacheError;
use crate::handle::CacheHandle;
use std::sync::Arc;

/// A data object whose samples live in the grid cache.
///
/// # Example
///
/// ```
/// use gridcache::buffer::GridBuffer;
/// use gridcache::cache::GridCache;
/// use gridcache::config::CacheConfig;
/// use gridcache::field::{GridField, GridLayout};
/// use gridcache::owner::GridBufferOwner;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let spill = tempfile::tempdir().unwrap();
/// let cache = Arc::new(GridCache::new(
///     CacheConfig::new()
///         .with_spill_directory(spill.path())
///         .with_housekeeping_interval(Duration::ZERO),
/// ).unwrap());
///
/// let field = GridField::from_values(
///     cache,
///     "temperature",
///     GridLayout::new(1, 4),
///     GridBuffer::new(vec![vec![1.0, 2.0, 3.0, 4.0]]).unwrap(),
/// ).unwrap();
///
/// let view = field.derive_view(false).unwrap();
/// view.replace_copied(&[vec![0.0, 0.0, 9.0, 9.0]]).unwrap();
/// assert_eq!(field.sample(2).unwrap(), Some(vec![9.0]));
/// ```
pub trait GridBufferOwner: Sized {
    /// The handle holding this owner's data.
    fn cache_handle(&self) -> &CacheHandle;

    /// Same kind of owner around a different handle.
    fn with_view(&self, handle: CacheHandle) -> Self;

    /// The buffer, produced or restored as needed.
    fn values(&self) -> Result<Arc<GridBuffer>, CacheError> {
        self.cache_handle().values()
    }

    /// An owned copy of the buffer, safe to mutate.
    fn values_copied(&self) -> Result<GridBuffer, CacheError> {
        let values = self.values()?;
        Ok(GridBuffer::clone(&values))
    }

    /// Samples widened to `f64`.
    fn values_f64(&self) -> Result<Vec<Vec<f64>>, CacheError> {
        Ok(self.values()?.to_f64())
    }

    /// Replace the buffer, moving it into the cache.
    fn replace(&self, buffer: GridBuffer) -> Result<(), CacheError> {
        self.cache_handle().replace(buffer)
    }

    /// Replace the buffer with a copy of borrowed bands.
    fn replace_copied(&self, bands: &[Vec<f32>]) -> Result<(), CacheError> {
        self.replace(GridBuffer::from_slices(bands)?)
    }

    /// A view of this owner.
    ///
    /// `copy = true` detaches the view with its own copy of the data;
    /// `copy = false` shares this owner's entry.
    fn derive_view(&self, copy: bool) -> Result<Self, CacheError> {
        Ok(self.with_view(self.cache_handle().derive(copy)?))
    }

    /// Per-band ranges, memoized until the next replace.
    fn range(&self) -> Result<Vec<SampleRange>, CacheError> {
        self.cache_handle().ranges()
    }

    /// Recompute the per-band ranges.
    fn refresh_range(&self) -> Result<Vec<SampleRange>, CacheError> {
        self.cache_handle().refresh_ranges()
    }

    /// Use these ranges instead of computing them.
    fn set_range(&self, ranges: Vec<SampleRange>) -> Result<(), CacheError> {
        self.cache_handle().set_ranges(ranges)
    }

    /// Per-band values at one sample index, `None` when out of range.
    fn sample(&self, index: usize) -> Result<Option<Vec<f32>>, CacheError> {
        Ok(self.values()?.sample(index))
    }

    fn shape(&self) -> Result<BufferShape, CacheError> {
        self.cache_handle().shape()
    }

    /// Release the cache entry if this owner is a root. Views of a disposed
    /// root fail with [`CacheError::RootReleased`].
    fn dispose(self) {
        self.cache_handle().release();
    }
}
