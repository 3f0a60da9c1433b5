//! Producer callback contract.
//!
//! A producer regenerates a root owner's buffer on a cache miss. The cache
//! knows nothing about where the data comes from; file readers, remote
//! decoders and sub-volume extractors all sit behind [`Producer`].

use crate::buffer::{BufferShape, GridBuffer, ShapeError};
use std::fmt;
use thiserror::Error;

/// Errors a producer may report.
#[derive(Debug, Error)]
pub enum ProduceError {
    /// Reading the source failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Source was read but could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Source data does not fit the requested geometry
    #[error("{0}")]
    Shape(#[from] ShapeError),

    /// Any other source failure (remote service, upstream owner)
    #[error("{0}")]
    Source(String),
}

/// Callback that materializes a buffer.
///
/// Implementations may block on I/O. They must be idempotent: the cache
/// calls `produce` again whenever the buffer has been evicted and its spill
/// file is unusable.
pub trait Producer: Send + Sync {
    /// Produce the full buffer.
    fn produce(&self) -> Result<GridBuffer, ProduceError>;

    /// Declared geometry of the produced buffer.
    fn shape(&self) -> BufferShape;

    /// Short human-readable description for logs and errors.
    fn label(&self) -> String {
        "producer".to_string()
    }
}

/// Producer backed by a closure.
///
/// # Example
///
/// ```
/// use gridcache::buffer::{BufferShape, GridBuffer};
/// use gridcache::producer::{FnProducer, Producer};
///
/// let producer = FnProducer::new("ramp", BufferShape::new(1, 3), || {
///     Ok(GridBuffer::new(vec![vec![0.0, 1.0, 2.0]])?)
/// });
/// assert_eq!(producer.produce().unwrap().sample_count(), 3);
/// ```
pub struct FnProducer<F> {
    label: String,
    shape: BufferShape,
    f: F,
}

impl<F> FnProducer<F>
where
    F: Fn() -> Result<GridBuffer, ProduceError> + Send + Sync,
{
    /// Wrap a closure as a producer.
    pub fn new(label: impl Into<String>, shape: BufferShape, f: F) -> Self {
        Self {
            label: label.into(),
            shape,
            f,
        }
    }
}

impl<F> Producer for FnProducer<F>
where
    F: Fn() -> Result<GridBuffer, ProduceError> + Send + Sync,
{
    fn produce(&self) -> Result<GridBuffer, ProduceError> {
        (self.f)()
    }

    fn shape(&self) -> BufferShape {
        self.shape
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

impl<F> fmt::Debug for FnProducer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProducer")
            .field("label", &self.label)
            .field("shape", &self.shape)
            .finish()
    }
}
