//! Core types for the cache system.

use crate::buffer::ShapeError;
use crate::producer::ProduceError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Process-wide counter for minting buffer identifiers.
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique identifier of a cache entry.
///
/// Identifiers carry no ordering or structural meaning; they are only
/// cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    /// Mint a fresh identifier.
    pub(crate) fn mint() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, used for file naming.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Rebuild an identifier from its raw value (file names, diagnostics).
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid-{}", self.0)
    }
}

/// Observable state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Buffer is in memory
    Resident,
    /// Buffer lives only in its spill file
    Spilled,
    /// A producer is running for this entry
    Producing,
    /// Entry exists but holds no data (reserved, or lost its spill file)
    Missing,
}

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Identifier is not (or no longer) registered
    #[error("Unknown buffer {0}: entry was never registered or already released")]
    UnknownBuffer(BufferId),

    /// The producer callback failed
    #[error("Producer '{label}' failed: {source}")]
    Produce {
        label: String,
        #[source]
        source: ProduceError,
    },

    /// Data does not fit the declared geometry
    #[error("Buffer shape error: {0}")]
    Shape(#[from] ShapeError),

    /// Buffer has no producer and its spill file is gone
    #[error("Buffer {0} cannot be regenerated: no producer and no spill file")]
    Unrecoverable(BufferId),

    /// Owner was disposed before this access
    #[error("Cache handle used after dispose")]
    Released,

    /// Root of a derived view was disposed
    #[error("Root of derived view has been released")]
    RootReleased,

    /// Aux metadata stored under a different type
    #[error("Metadata for {id} has type {stored}, requested {requested}")]
    MetadataType {
        id: BufferId,
        stored: &'static str,
        requested: &'static str,
    },

    /// Aux metadata could not be encoded
    #[error("Failed to persist metadata for {id}: {reason}")]
    MetadataPersist { id: BufferId, reason: String },

    /// I/O error while setting up cache directories
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Global cache initialized twice
    #[error("Global grid cache is already initialized")]
    AlreadyInitialized,

    /// Global cache used before init
    #[error("Global grid cache is not initialized")]
    NotInitialized,
}
