//! A named, two-dimensional grid owner.

use crate::buffer::{BufferShape, GridBuffer, ShapeError};
use crate::cache::{CacheError, GridCache};
use crate::handle::CacheHandle;
use crate::owner::GridBufferOwner;
use crate::producer::Producer;
use std::sync::Arc;

/// Row/column layout of each band, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
}

impl GridLayout {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Samples per band.
    pub fn cells(&self) -> usize {
        self.rows * self.cols
    }

    /// Flat sample index of `(row, col)`, or `None` outside the grid.
    pub fn index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.cols).then(|| row * self.cols + col)
    }

    /// Buffer shape for `bands` bands of this layout.
    pub fn shape(&self, bands: usize) -> BufferShape {
        BufferShape::new(bands, self.cells())
    }

    /// Check that a buffer shape fits this layout.
    pub fn check(&self, shape: BufferShape) -> Result<(), ShapeError> {
        if shape.samples != self.cells() {
            return Err(ShapeError::Mismatch {
                expected: self.shape(shape.bands),
                actual: shape,
            });
        }
        Ok(())
    }
}

/// Generic grid owner: a name, a layout and a cache handle.
#[derive(Debug)]
pub struct GridField {
    name: String,
    layout: GridLayout,
    handle: CacheHandle,
}

impl GridField {
    /// Field produced on first access.
    pub fn lazy(
        cache: Arc<GridCache>,
        name: impl Into<String>,
        layout: GridLayout,
        producer: Arc<dyn Producer>,
    ) -> Result<Self, CacheError> {
        layout.check(producer.shape())?;
        Ok(Self {
            name: name.into(),
            layout,
            handle: CacheHandle::lazy(cache, producer),
        })
    }

    /// Field registered from known values.
    pub fn from_values(
        cache: Arc<GridCache>,
        name: impl Into<String>,
        layout: GridLayout,
        buffer: GridBuffer,
    ) -> Result<Self, CacheError> {
        layout.check(buffer.shape())?;
        Ok(Self {
            name: name.into(),
            layout,
            handle: CacheHandle::with_values(cache, buffer),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    /// Values of every band at one grid cell.
    pub fn cell(&self, row: usize, col: usize) -> Result<Option<Vec<f32>>, CacheError> {
        match self.layout.index(row, col) {
            Some(index) => self.sample(index),
            None => Ok(None),
        }
    }
}

impl GridBufferOwner for GridField {
    fn cache_handle(&self) -> &CacheHandle {
        &self.handle
    }

    fn with_view(&self, handle: CacheHandle) -> Self {
        Self {
            name: self.name.clone(),
            layout: self.layout,
            handle,
        }
    }
}
