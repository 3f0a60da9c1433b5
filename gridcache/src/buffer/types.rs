//! Core buffer types.

use std::fmt;
use thiserror::Error;

/// Declared geometry of a grid buffer.
///
/// `samples` is the length of every band, i.e. the sample count of the
/// owner's domain (lines × elements for an image).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferShape {
    /// Number of bands (range components)
    pub bands: usize,
    /// Samples per band
    pub samples: usize,
}

impl BufferShape {
    /// Create a new shape.
    pub fn new(bands: usize, samples: usize) -> Self {
        Self { bands, samples }
    }

    /// Size of a buffer with this shape in bytes.
    pub fn size_bytes(&self) -> u64 {
        (self.bands as u64) * (self.samples as u64) * std::mem::size_of::<f32>() as u64
    }
}

impl fmt::Display for BufferShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} band(s) x {} sample(s)", self.bands, self.samples)
    }
}

/// Geometry errors raised when data does not fit the declared shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShapeError {
    /// Bands of one buffer have different lengths
    #[error("Ragged buffer: band {band} has {actual} samples, expected {expected}")]
    RaggedBands {
        band: usize,
        expected: usize,
        actual: usize,
    },

    /// Buffer does not match the owner's declared geometry
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    Mismatch {
        expected: BufferShape,
        actual: BufferShape,
    },

    /// A copy into the target geometry would read or write out of bounds
    #[error(
        "Out of bounds while copying {context}: index {index} outside 0..{limit} \
         (source {source_dims:?}, target {target_dims:?})"
    )]
    OutOfBounds {
        context: String,
        index: usize,
        limit: usize,
        source_dims: Vec<usize>,
        target_dims: Vec<usize>,
    },
}

/// A banded array of `f32` samples.
///
/// Every band has the same length. The buffer is immutable once built;
/// replacing data means building a new buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct GridBuffer {
    bands: Vec<Vec<f32>>,
}

impl GridBuffer {
    /// Build a buffer from per-band sample vectors.
    ///
    /// Fails with [`ShapeError::RaggedBands`] if the bands differ in length.
    pub fn new(bands: Vec<Vec<f32>>) -> Result<Self, ShapeError> {
        if let Some(first) = bands.first() {
            let expected = first.len();
            if let Some((band, values)) = bands
                .iter()
                .enumerate()
                .find(|(_, values)| values.len() != expected)
            {
                return Err(ShapeError::RaggedBands {
                    band,
                    expected,
                    actual: values.len(),
                });
            }
        }
        Ok(Self { bands })
    }

    /// Build a buffer by cloning borrowed band slices.
    pub fn from_slices<S: AsRef<[f32]>>(bands: &[S]) -> Result<Self, ShapeError> {
        Self::new(bands.iter().map(|b| b.as_ref().to_vec()).collect())
    }

    /// Build a buffer of the given shape with every sample set to `value`.
    pub fn filled(shape: BufferShape, value: f32) -> Self {
        Self {
            bands: vec![vec![value; shape.samples]; shape.bands],
        }
    }

    /// The buffer geometry.
    pub fn shape(&self) -> BufferShape {
        BufferShape {
            bands: self.bands.len(),
            samples: self.bands.first().map_or(0, Vec::len),
        }
    }

    /// Number of bands.
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Samples per band.
    pub fn sample_count(&self) -> usize {
        self.shape().samples
    }

    /// Borrow one band.
    pub fn band(&self, index: usize) -> Option<&[f32]> {
        self.bands.get(index).map(Vec::as_slice)
    }

    /// Borrow all bands.
    pub fn bands(&self) -> &[Vec<f32>] {
        &self.bands
    }

    /// Take the band vectors out of the buffer.
    pub fn into_bands(self) -> Vec<Vec<f32>> {
        self.bands
    }

    /// Values of every band at one sample index, or `None` if out of range.
    pub fn sample(&self, index: usize) -> Option<Vec<f32>> {
        if index >= self.sample_count() {
            return None;
        }
        Some(self.bands.iter().map(|band| band[index]).collect())
    }

    /// Widen every sample to `f64`.
    pub fn to_f64(&self) -> Vec<Vec<f64>> {
        self.bands
            .iter()
            .map(|band| band.iter().map(|&v| f64::from(v)).collect())
            .collect()
    }

    /// Resident size in bytes (sample payload only).
    pub fn size_bytes(&self) -> u64 {
        self.shape().size_bytes()
    }

    /// Check this buffer against a declared shape.
    pub fn ensure_shape(&self, expected: BufferShape) -> Result<(), ShapeError> {
        let actual = self.shape();
        if actual != expected {
            return Err(ShapeError::Mismatch { expected, actual });
        }
        Ok(())
    }
}
