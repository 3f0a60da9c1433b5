//! Lazy, disk-spilling cache for grid buffers.
//!
//! [`BufferStore`] maps [`BufferId`]s to buffers that are produced on first
//! access, spilled to per-session files when idle or over budget, and
//! restored on the next access. [`AuxMetadataCache`] keeps typed values
//! derived from a root buffer. [`GridCache`] ties both together with a
//! [`HousekeepingDaemon`].

mod codec;
mod daemon;
mod entry;
pub mod global;
mod metadata;
mod path;
mod policy;
mod spill;
mod stats;
mod store;
mod system;
mod types;

pub use codec::{SpillError, HEADER_LEN, SPILL_MAGIC};
pub use daemon::HousekeepingDaemon;
pub use metadata::AuxMetadataCache;
pub use path::{metadata_path, session_directory, spill_path, METADATA_EXTENSION, SPILL_EXTENSION};
pub use policy::{EvictionPolicy, HousekeepingReport, SpillCandidate};
pub use spill::SpillManager;
pub use stats::CacheStats;
pub use store::BufferStore;
pub use system::GridCache;
pub use types::{BufferId, CacheError, EntryState};
