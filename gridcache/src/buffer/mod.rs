//! Grid buffers: banded `f32` sample arrays and their derived ranges.
//!
//! A [`GridBuffer`] is the unit the cache stores. It holds one sample
//! sequence per band, all of identical length, and is shared between
//! readers as `Arc<GridBuffer>`.

mod range;
mod types;

pub use range::{compute_ranges, SampleRange};
pub use types::{BufferShape, GridBuffer, ShapeError};
