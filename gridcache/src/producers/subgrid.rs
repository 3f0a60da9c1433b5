//! Strided windows cut from another owner's buffer.
//!
//! A [`GridSlice`] is produced lazily from a derived view of its source, so
//! the slice never keeps the source's root alive. If the source is released
//! first, producing the slice fails.

use crate::buffer::{BufferShape, GridBuffer, ShapeError};
use crate::cache::CacheError;
use crate::field::GridLayout;
use crate::handle::CacheHandle;
use crate::owner::GridBufferOwner;
use crate::producer::{ProduceError, Producer};
use std::sync::Arc;
use tracing::trace;

/// Rectangular, optionally strided selection of rows and columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    row0: usize,
    col0: usize,
    rows: usize,
    cols: usize,
    row_stride: usize,
    col_stride: usize,
}

impl Window {
    /// `rows` by `cols` cells starting at `(row0, col0)`.
    pub fn new(row0: usize, col0: usize, rows: usize, cols: usize) -> Self {
        Self {
            row0,
            col0,
            rows,
            cols,
            row_stride: 1,
            col_stride: 1,
        }
    }

    /// Take every `row_stride`-th row and `col_stride`-th column. Zero is
    /// treated as one.
    pub fn with_stride(mut self, row_stride: usize, col_stride: usize) -> Self {
        self.row_stride = row_stride.max(1);
        self.col_stride = col_stride.max(1);
        self
    }

    /// Layout of the extracted grid.
    pub fn layout(&self) -> GridLayout {
        GridLayout::new(self.rows, self.cols)
    }

    /// Last selected row, `None` if it is not addressable.
    fn last_row(&self) -> Option<usize> {
        last_index(self.row0, self.rows, self.row_stride)
    }

    fn last_col(&self) -> Option<usize> {
        last_index(self.col0, self.cols, self.col_stride)
    }

    /// Check that the window lies inside `source`.
    pub fn check(&self, source: GridLayout) -> Result<(), ShapeError> {
        if self.rows == 0 || self.cols == 0 {
            return Ok(());
        }
        let outside = |last: Option<usize>, limit: usize| match last {
            Some(index) if index < limit => None,
            Some(index) => Some((index, limit)),
            None => Some((usize::MAX, limit)),
        };
        let Some((index, limit)) = outside(self.last_row(), source.rows)
            .or_else(|| outside(self.last_col(), source.cols))
        else {
            return Ok(());
        };
        Err(ShapeError::OutOfBounds {
            context: "sub-grid window".to_string(),
            index,
            limit,
            source_dims: vec![source.rows, source.cols],
            target_dims: vec![self.rows, self.cols],
        })
    }
}

fn last_index(start: usize, count: usize, stride: usize) -> Option<usize> {
    count.saturating_sub(1).checked_mul(stride)?.checked_add(start)
}

/// Produces a window of every band of a source owner.
pub struct SubGridProducer {
    source: CacheHandle,
    source_layout: GridLayout,
    window: Window,
    bands: usize,
}

impl SubGridProducer {
    /// Build a producer reading `window` out of `source`.
    pub fn new<O: GridBufferOwner>(
        source: &O,
        source_layout: GridLayout,
        window: Window,
    ) -> Result<Self, CacheError> {
        let shape = source.shape()?;
        source_layout.check(shape)?;
        window.check(source_layout)?;
        Ok(Self {
            source: source.cache_handle().derive(false)?,
            source_layout,
            window,
            bands: shape.bands,
        })
    }

    pub fn window(&self) -> Window {
        self.window
    }
}

impl Producer for SubGridProducer {
    fn produce(&self) -> Result<GridBuffer, ProduceError> {
        let source = self
            .source
            .values()
            .map_err(|e| ProduceError::Source(format!("sub-grid source unavailable: {}", e)))?;
        source.ensure_shape(self.source_layout.shape(self.bands))?;
        self.window.check(self.source_layout)?;

        let w = self.window;
        let mut bands = Vec::with_capacity(self.bands);
        for band in source.bands() {
            let mut out = Vec::with_capacity(w.rows * w.cols);
            for r in 0..w.rows {
                let row = w.row0 + r * w.row_stride;
                for c in 0..w.cols {
                    let col = w.col0 + c * w.col_stride;
                    let index = row * self.source_layout.cols + col;
                    let value = band.get(index).copied().ok_or_else(|| ShapeError::OutOfBounds {
                        context: "sub-grid copy".to_string(),
                        index,
                        limit: band.len(),
                        source_dims: vec![self.source_layout.rows, self.source_layout.cols],
                        target_dims: vec![w.rows, w.cols],
                    })?;
                    out.push(value);
                }
            }
            bands.push(out);
        }

        trace!(rows = w.rows, cols = w.cols, bands = bands.len(), "Extracted sub-grid");
        Ok(GridBuffer::new(bands)?)
    }

    fn shape(&self) -> BufferShape {
        self.window.layout().shape(self.bands)
    }

    fn label(&self) -> String {
        let w = self.window;
        format!(
            "subgrid[{}+{}x{}, {}+{}x{}]",
            w.row0, w.rows, w.row_stride, w.col0, w.cols, w.col_stride
        )
    }
}

/// Owner of a sub-grid extracted from another owner.
#[derive(Debug)]
pub struct GridSlice {
    layout: GridLayout,
    handle: CacheHandle,
}

impl GridSlice {
    /// Lazy slice of `source`, produced on first access.
    pub fn of<O: GridBufferOwner>(
        source: &O,
        source_layout: GridLayout,
        window: Window,
    ) -> Result<Self, CacheError> {
        let cache = source.cache_handle().cache()?;
        let producer = SubGridProducer::new(source, source_layout, window)?;
        Ok(Self {
            layout: window.layout(),
            handle: CacheHandle::lazy(cache, Arc::new(producer)),
        })
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }
}

impl GridBufferOwner for GridSlice {
    fn cache_handle(&self) -> &CacheHandle {
        &self.handle
    }

    fn with_view(&self, handle: CacheHandle) -> Self {
        Self {
            layout: self.layout,
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GridCache;
    use crate::config::CacheConfig;
    use crate::field::GridField;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_cache() -> (Arc<GridCache>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::new()
            .with_spill_directory(temp_dir.path())
            .with_housekeeping_interval(Duration::ZERO);
        (Arc::new(GridCache::new(config).unwrap()), temp_dir)
    }

    /// 3x4 grid with values `10 * row + col`, plus a negated second band.
    fn create_source(cache: Arc<GridCache>) -> GridField {
        let first: Vec<f32> = (0..3)
            .flat_map(|r| (0..4).map(move |c| (10 * r + c) as f32))
            .collect();
        let second = first.iter().map(|v| -v).collect();
        GridField::from_values(
            cache,
            "source",
            GridLayout::new(3, 4),
            GridBuffer::new(vec![first, second]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_window_check() {
        let source = GridLayout::new(3, 4);
        assert!(Window::new(1, 1, 2, 3).check(source).is_ok());
        assert!(Window::new(0, 0, 0, 0).check(source).is_ok());
        assert!(Window::new(0, 0, 2, 2).with_stride(2, 3).check(source).is_ok());

        let err = Window::new(0, 0, 2, 2).with_stride(3, 1).check(source).unwrap_err();
        assert!(matches!(err, ShapeError::OutOfBounds { index: 3, limit: 3, .. }));

        let err = Window::new(0, 2, 1, 3).check(source).unwrap_err();
        assert!(matches!(err, ShapeError::OutOfBounds { index: 4, limit: 4, .. }));
    }

    #[test]
    fn test_window_with_huge_stride_is_out_of_bounds() {
        let source = GridLayout::new(3, 4);

        let err = Window::new(0, 0, 2, 1)
            .with_stride(usize::MAX, 1)
            .check(source)
            .unwrap_err();
        assert!(matches!(err, ShapeError::OutOfBounds { index: usize::MAX, limit: 3, .. }));

        let err = Window::new(0, usize::MAX, 1, 2).check(source).unwrap_err();
        assert!(matches!(err, ShapeError::OutOfBounds { index: usize::MAX, limit: 4, .. }));

        // A single row never advances by the stride
        assert!(Window::new(2, 0, 1, 1).with_stride(usize::MAX, usize::MAX).check(source).is_ok());
    }

    #[test]
    fn test_extracts_window_from_every_band() {
        let (cache, _temp) = create_cache();
        let source = create_source(cache);

        let slice = GridSlice::of(&source, GridLayout::new(3, 4), Window::new(1, 1, 2, 2)).unwrap();
        let values = slice.values().unwrap();
        assert_eq!(values.band(0).unwrap(), &[11.0, 12.0, 21.0, 22.0]);
        assert_eq!(values.band(1).unwrap(), &[-11.0, -12.0, -21.0, -22.0]);
        assert_eq!(slice.layout(), GridLayout::new(2, 2));
    }

    #[test]
    fn test_strided_window() {
        let (cache, _temp) = create_cache();
        let source = create_source(cache);

        let window = Window::new(0, 0, 2, 2).with_stride(2, 3);
        let slice = GridSlice::of(&source, GridLayout::new(3, 4), window).unwrap();
        assert_eq!(slice.values().unwrap().band(0).unwrap(), &[0.0, 3.0, 20.0, 23.0]);
    }

    #[test]
    fn test_window_outside_source_rejected() {
        let (cache, _temp) = create_cache();
        let source = create_source(cache);

        let err = GridSlice::of(&source, GridLayout::new(3, 4), Window::new(2, 0, 2, 1)).unwrap_err();
        assert!(matches!(err, CacheError::Shape(ShapeError::OutOfBounds { .. })));
    }

    #[test]
    fn test_wrong_source_layout_rejected() {
        let (cache, _temp) = create_cache();
        let source = create_source(cache);

        let err = GridSlice::of(&source, GridLayout::new(2, 2), Window::new(0, 0, 1, 1)).unwrap_err();
        assert!(matches!(err, CacheError::Shape(ShapeError::Mismatch { .. })));
    }

    #[test]
    fn test_slice_fails_after_source_released() {
        let (cache, _temp) = create_cache();
        let source = create_source(cache);
        let slice = GridSlice::of(&source, GridLayout::new(3, 4), Window::new(0, 0, 1, 1)).unwrap();

        source.dispose();

        let err = slice.values().unwrap_err();
        assert!(matches!(
            err,
            CacheError::Produce {
                source: ProduceError::Source(_),
                ..
            }
        ));
    }

    #[test]
    fn test_slice_is_independent_of_later_source_updates() {
        let (cache, _temp) = create_cache();
        let source = create_source(cache);
        let slice = GridSlice::of(&source, GridLayout::new(3, 4), Window::new(0, 0, 1, 2)).unwrap();

        assert_eq!(slice.values().unwrap().band(0).unwrap(), &[0.0, 1.0]);
        source
            .replace(GridBuffer::filled(BufferShape::new(2, 12), 7.0))
            .unwrap();
        // The slice has its own entry once produced
        assert_eq!(slice.values().unwrap().band(0).unwrap(), &[0.0, 1.0]);
    }
}
