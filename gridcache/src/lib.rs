//! gridcache - lazy, disk-spilling working-set cache for numeric grids
//!
//! Large banded `f32` grids (satellite images, model fields, their
//! sub-windows) are held in a [`cache::BufferStore`]. Buffers are produced on
//! first access, spilled to per-session files when idle or when the
//! resident budget is exceeded, and restored transparently on the next read.
//!
//! Data objects implement [`owner::GridBufferOwner`] on top of a
//! [`handle::CacheHandle`]:
//!
//! ```
//! use gridcache::buffer::{BufferShape, GridBuffer};
//! use gridcache::cache::GridCache;
//! use gridcache::config::CacheConfig;
//! use gridcache::field::{GridField, GridLayout};
//! use gridcache::owner::GridBufferOwner;
//! use gridcache::producer::FnProducer;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let spill = tempfile::tempdir().unwrap();
//! let cache = Arc::new(GridCache::new(
//!     CacheConfig::new()
//!         .with_spill_directory(spill.path())
//!         .with_housekeeping_interval(Duration::ZERO),
//! ).unwrap());
//!
//! let producer = FnProducer::new("ramp", BufferShape::new(1, 4), || {
//!     Ok(GridBuffer::new(vec![vec![0.0, 1.0, 2.0, 3.0]])?)
//! });
//! let field = GridField::lazy(cache, "ramp", GridLayout::new(2, 2), Arc::new(producer)).unwrap();
//!
//! assert_eq!(field.range().unwrap()[0].max, 3.0);
//! ```

pub mod buffer;
pub mod cache;
pub mod config;
pub mod field;
pub mod handle;
pub mod logging;
pub mod owner;
pub mod producer;
pub mod producers;

/// Version of the gridcache library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
