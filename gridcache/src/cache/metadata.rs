//! Auxiliary metadata per root buffer.
//!
//! Owners attach derived, expensive-to-compute values (navigation blocks,
//! calibration tables) to their root buffer id. A value is produced once,
//! persisted as `grid-<n>.aux` in the spill session directory, and shared by
//! every view of that root. The pressure policy never evicts metadata; only
//! [`unload`](AuxMetadataCache::unload) drops the in-memory copy.

use crate::cache::path::metadata_path;
use crate::cache::spill::write_atomic;
use crate::cache::types::{BufferId, CacheError};
use crate::producer::ProduceError;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

type AnyValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct MetadataSlot {
    value: Option<AnyValue>,
    /// Type the value was produced as; survives unload
    type_name: Option<&'static str>,
    /// Artifact on disk matches the value
    persisted: bool,
}

/// Typed metadata values keyed by root buffer id.
pub struct AuxMetadataCache {
    session_dir: PathBuf,
    slots: DashMap<BufferId, Arc<Mutex<MetadataSlot>>>,
}

impl AuxMetadataCache {
    /// Create a cache persisting into `session_dir`.
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
            slots: DashMap::new(),
        }
    }

    pub fn path_for(&self, id: BufferId) -> PathBuf {
        metadata_path(&self.session_dir, id)
    }

    /// Return the value for `id`: from memory, else from the persisted
    /// artifact, else by calling `produce` and persisting the result.
    ///
    /// Concurrent callers for the same id run `produce` at most once.
    /// Requesting a different type than the one stored fails with
    /// [`CacheError::MetadataType`].
    pub fn get_or_produce<T, F>(&self, id: BufferId, produce: F) -> Result<Arc<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Result<T, ProduceError>,
    {
        let slot = Arc::clone(self.slots.entry(id).or_default().value());
        let mut slot = slot.lock();
        let requested = type_name::<T>();

        if let Some(stored) = slot.type_name {
            if stored != requested {
                return Err(CacheError::MetadataType {
                    id,
                    stored,
                    requested,
                });
            }
        }

        if let Some(value) = slot.value.clone() {
            return downcast(id, value, slot.type_name.unwrap_or(requested));
        }

        let path = self.path_for(id);
        if slot.persisted {
            match read_artifact::<T>(&path) {
                Ok(value) => {
                    debug!(id = %id, "Metadata restored from disk");
                    return Ok(Self::install(&mut slot, value, true));
                }
                Err(e) => {
                    warn!(id = %id, path = %path.display(), error = %e, "Discarding unreadable metadata");
                    let _ = fs::remove_file(&path);
                    slot.persisted = false;
                }
            }
        }

        let value = produce().map_err(|source| CacheError::Produce {
            label: format!("metadata for {}", id),
            source,
        })?;
        let bytes = bincode::serialize(&value).map_err(|e| CacheError::MetadataPersist {
            id,
            reason: e.to_string(),
        })?;
        let persisted = match write_atomic(&path, |w| w.write_all(&bytes)) {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to persist metadata, keeping it in memory");
                false
            }
        };
        debug!(id = %id, bytes = bytes.len(), persisted, "Metadata produced");
        Ok(Self::install(&mut slot, value, persisted))
    }

    /// Drop the in-memory copy; the next read restores from disk.
    ///
    /// Values that could not be persisted stay loaded. Returns whether the
    /// value was dropped.
    pub fn unload(&self, id: BufferId) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let mut slot = slot.lock();
        if slot.persisted && slot.value.is_some() {
            slot.value = None;
            debug!(id = %id, "Metadata unloaded");
            true
        } else {
            false
        }
    }

    /// Drop both the memory copy and the persisted artifact.
    pub fn release(&self, id: BufferId) -> bool {
        let Some((_, slot)) = self.slots.remove(&id) else {
            return false;
        };
        let mut slot = slot.lock();
        slot.value = None;
        slot.persisted = false;
        remove_artifact(&self.path_for(id));
        true
    }

    /// Release every entry.
    pub fn release_all(&self) -> usize {
        let ids: Vec<BufferId> = self.slots.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.release(*id)).count()
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Whether the value for `id` is currently in memory.
    pub fn is_loaded(&self, id: BufferId) -> bool {
        self.slot(id).is_some_and(|slot| slot.lock().value.is_some())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: BufferId) -> Option<Arc<Mutex<MetadataSlot>>> {
        self.slots.get(&id).map(|e| Arc::clone(e.value()))
    }

    fn install<T: Send + Sync + 'static>(
        slot: &mut MetadataSlot,
        value: T,
        persisted: bool,
    ) -> Arc<T> {
        let value = Arc::new(value);
        slot.value = Some(Arc::clone(&value) as AnyValue);
        slot.type_name = Some(type_name::<T>());
        slot.persisted = persisted;
        value
    }
}

impl std::fmt::Debug for AuxMetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuxMetadataCache")
            .field("session_dir", &self.session_dir)
            .field("entries", &self.slots.len())
            .finish()
    }
}

fn downcast<T: Send + Sync + 'static>(
    id: BufferId,
    value: AnyValue,
    stored: &'static str,
) -> Result<Arc<T>, CacheError> {
    value.downcast::<T>().map_err(|_| CacheError::MetadataType {
        id,
        stored,
        requested: type_name::<T>(),
    })
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let bytes = fs::read(path)?;
    bincode::deserialize(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn remove_artifact(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete metadata file"),
    }
}
