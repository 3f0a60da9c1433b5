//! Spill files: persisting evicted buffers and restoring them on demand.
//!
//! Each [`SpillManager`] owns one session directory. Files are written to a
//! temporary sibling and renamed into place, so a reader never observes a
//! partially written spill file.

use crate::buffer::GridBuffer;
use crate::cache::codec::{self, SpillError};
use crate::cache::path::{id_from_file_name, session_directory, spill_path, temp_path};
use crate::cache::types::BufferId;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Writes, restores and deletes buffer spill files.
#[derive(Debug)]
pub struct SpillManager {
    /// Directory holding this session's files
    session_dir: PathBuf,
}

impl SpillManager {
    /// Create a spill manager with a fresh session directory under `spill_dir`.
    pub fn new(spill_dir: &Path) -> io::Result<Self> {
        let session_dir = session_directory(spill_dir, Uuid::new_v4());
        fs::create_dir_all(&session_dir)?;
        debug!(dir = %session_dir.display(), "Spill session directory created");
        Ok(Self { session_dir })
    }

    /// Directory holding this session's files.
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Path the spill file for `id` lives at.
    pub fn path_for(&self, id: BufferId) -> PathBuf {
        spill_path(&self.session_dir, id)
    }

    /// Check whether a spill file exists for `id`.
    pub fn has_spill(&self, id: BufferId) -> bool {
        self.path_for(id).is_file()
    }

    /// Serialize a buffer to its spill file.
    ///
    /// On success the caller may drop its in-memory copy.
    pub fn spill(&self, id: BufferId, buffer: &GridBuffer) -> Result<PathBuf, SpillError> {
        let path = self.path_for(id);
        write_atomic(&path, |writer| codec::write_buffer(writer, buffer))?;
        debug!(
            id = %id,
            bytes = buffer.size_bytes(),
            "Buffer spilled to disk"
        );
        Ok(path)
    }

    /// Read a buffer back from its spill file.
    ///
    /// A missing or corrupt file is a cache miss, not an error: the caller
    /// falls back to the producer.
    pub fn restore(&self, id: BufferId) -> Option<GridBuffer> {
        let path = self.path_for(id);
        match read_spill(&path) {
            Ok(buffer) => {
                debug!(id = %id, "Buffer restored from spill file");
                Some(buffer)
            }
            Err(SpillError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(id = %id, "No spill file to restore");
                None
            }
            Err(e) => {
                warn!(id = %id, path = %path.display(), error = %e, "Discarding unreadable spill file");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Remove the spill file for `id`, if any.
    ///
    /// Failures are logged and otherwise ignored; a leaked temp file is
    /// cleaned up with the session directory.
    pub fn delete_spill(&self, id: BufferId) {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => debug!(id = %id, "Spill file deleted"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(id = %id, path = %path.display(), error = %e, "Failed to delete spill file"),
        }
    }

    /// Identifiers that currently have a spill file in this session.
    pub fn spilled_ids(&self) -> Vec<BufferId> {
        let entries = match fs::read_dir(&self.session_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut ids: Vec<BufferId> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                if !name.ends_with(crate::cache::path::SPILL_EXTENSION) {
                    return None;
                }
                id_from_file_name(name)
            })
            .collect();
        ids.sort_by_key(BufferId::as_u64);
        ids
    }

    /// Remove the whole session directory.
    pub fn purge(&self) {
        match fs::remove_dir_all(&self.session_dir) {
            Ok(()) => debug!(dir = %self.session_dir.display(), "Spill session directory removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                dir = %self.session_dir.display(),
                error = %e,
                "Failed to remove spill session directory"
            ),
        }
    }
}

/// Write a file through a temporary sibling and rename it into place.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let temp = temp_path(path);
    let result = File::create(&temp).and_then(|file| {
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush()?;
        Ok(())
    });

    match result.and_then(|()| fs::rename(&temp, path)) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&temp);
            Err(e)
        }
    }
}

fn read_spill(path: &Path) -> Result<GridBuffer, SpillError> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    codec::read_buffer(&mut reader, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_manager() -> (SpillManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let manager = SpillManager::new(temp_dir.path()).unwrap();
        (manager, temp_dir)
    }

    fn sample_buffer() -> GridBuffer {
        GridBuffer::new(vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]).unwrap()
    }

    #[test]
    fn test_new_creates_session_directory() {
        let (manager, temp) = create_manager();
        assert!(manager.session_dir().is_dir());
        assert!(manager.session_dir().starts_with(temp.path()));
    }

    #[test]
    fn test_two_managers_use_distinct_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let a = SpillManager::new(temp_dir.path()).unwrap();
        let b = SpillManager::new(temp_dir.path()).unwrap();
        assert_ne!(a.session_dir(), b.session_dir());
    }

    #[test]
    fn test_spill_then_restore() {
        let (manager, _temp) = create_manager();
        let id = BufferId::mint();
        let buffer = sample_buffer();

        let path = manager.spill(id, &buffer).unwrap();
        assert!(path.is_file());
        assert!(manager.has_spill(id));
        assert!(!temp_path(&path).exists(), "temp file must be renamed away");

        assert_eq!(manager.restore(id), Some(buffer));
    }

    #[test]
    fn test_restore_missing_is_miss() {
        let (manager, _temp) = create_manager();
        assert_eq!(manager.restore(BufferId::mint()), None);
    }

    #[test]
    fn test_restore_corrupt_is_miss_and_removes_file() {
        let (manager, _temp) = create_manager();
        let id = BufferId::mint();
        manager.spill(id, &sample_buffer()).unwrap();

        fs::write(manager.path_for(id), b"GSPL garbage").unwrap();

        assert_eq!(manager.restore(id), None);
        assert!(!manager.has_spill(id));
    }

    #[test]
    fn test_spill_overwrites_previous_file() {
        let (manager, _temp) = create_manager();
        let id = BufferId::mint();
        manager.spill(id, &sample_buffer()).unwrap();

        let replacement = GridBuffer::new(vec![vec![0.0; 4], vec![9.0; 4]]).unwrap();
        manager.spill(id, &replacement).unwrap();

        assert_eq!(manager.restore(id), Some(replacement));
    }

    #[test]
    fn test_delete_spill_is_idempotent() {
        let (manager, _temp) = create_manager();
        let id = BufferId::mint();
        manager.spill(id, &sample_buffer()).unwrap();

        manager.delete_spill(id);
        manager.delete_spill(id);

        assert!(!manager.has_spill(id));
    }

    #[test]
    fn test_spill_fails_when_session_dir_is_gone() {
        let (manager, _temp) = create_manager();
        manager.purge();

        let result = manager.spill(BufferId::mint(), &sample_buffer());
        assert!(matches!(result, Err(SpillError::Io(_))));
    }

    #[test]
    fn test_spilled_ids_lists_only_spill_files() {
        let (manager, _temp) = create_manager();
        let a = BufferId::mint();
        let b = BufferId::mint();
        manager.spill(a, &sample_buffer()).unwrap();
        manager.spill(b, &sample_buffer()).unwrap();
        fs::write(manager.session_dir().join("notes.txt"), b"x").unwrap();

        assert_eq!(manager.spilled_ids(), vec![a, b]);
    }

    #[test]
    fn test_purge_removes_directory() {
        let (manager, _temp) = create_manager();
        manager.spill(BufferId::mint(), &sample_buffer()).unwrap();

        manager.purge();
        assert!(!manager.session_dir().exists());
        // Second purge is harmless
        manager.purge();
    }
}
