//! Grid cache coordinator.

use crate::cache::daemon::HousekeepingDaemon;
use crate::cache::metadata::AuxMetadataCache;
use crate::cache::policy::{EvictionPolicy, HousekeepingReport};
use crate::cache::spill::SpillManager;
use crate::cache::stats::CacheStats;
use crate::cache::store::BufferStore;
use crate::cache::types::{BufferId, CacheError};
use crate::config::{format_size, CacheConfig};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A buffer store, its aux metadata and its housekeeping daemon.
///
/// Owners hold an `Arc<GridCache>` through their [`CacheHandle`]s.
/// Each instance uses its own spill session directory, removed on
/// [`shutdown`](Self::shutdown) or drop.
///
/// # Example
///
/// ```
/// use gridcache::buffer::GridBuffer;
/// use gridcache::cache::GridCache;
/// use gridcache::config::CacheConfig;
/// use std::time::Duration;
///
/// let spill = tempfile::tempdir().unwrap();
/// let config = CacheConfig::new()
///     .with_spill_directory(spill.path())
///     .with_housekeeping_interval(Duration::ZERO);
/// let cache = GridCache::new(config).unwrap();
///
/// let id = cache.store().register(GridBuffer::new(vec![vec![1.0, 2.0]]).unwrap());
/// assert!(cache.store().fetch(id).unwrap().is_some());
///
/// cache.shutdown();
/// ```
///
/// [`CacheHandle`]: crate::handle::CacheHandle
pub struct GridCache {
    config: CacheConfig,
    store: Arc<BufferStore>,
    metadata: AuxMetadataCache,
    daemon: Mutex<Option<HousekeepingDaemon>>,
    shut_down: AtomicBool,
}

impl GridCache {
    /// Create the cache, its spill session directory and, for a non-zero
    /// housekeeping interval, the background daemon.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let spill = Arc::new(SpillManager::new(config.spill_directory())?);
        let metadata = AuxMetadataCache::new(spill.session_dir());
        let store = Arc::new(BufferStore::new(
            spill,
            EvictionPolicy::from_config(&config),
        ));

        let interval = config.housekeeping_interval();
        let daemon = if interval.is_zero() {
            None
        } else {
            Some(HousekeepingDaemon::start(Arc::clone(&store), interval)?)
        };

        info!(
            spill_dir = %store.spill_manager().session_dir().display(),
            budget = %config
                .resident_budget()
                .map(format_size)
                .unwrap_or_else(|| "unbounded".to_string()),
            idle_secs = config.idle_clear_delay().map(|d| d.as_secs()),
            "Grid cache initialized"
        );

        Ok(Self {
            config,
            store,
            metadata,
            daemon: Mutex::new(daemon),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<BufferStore> {
        &self.store
    }

    pub fn metadata(&self) -> &AuxMetadataCache {
        &self.metadata
    }

    /// Directory holding this instance's spill and metadata files.
    pub fn session_dir(&self) -> &Path {
        self.store.spill_manager().session_dir()
    }

    /// Release a root buffer together with its aux metadata.
    pub fn release_buffer(&self, id: BufferId) -> bool {
        let released = self.store.release(id);
        self.metadata.release(id);
        released
    }

    /// Run one housekeeping pass now.
    pub fn housekeep(&self) -> HousekeepingReport {
        self.store.housekeep()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Log a one-line statistics summary.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            uptime_secs = stats.uptime().as_secs(),
            metadata_entries = self.metadata.len(),
            "[CACHE] {}",
            stats.summary()
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop the daemon, release all entries and remove the session directory.
    ///
    /// Idempotent. Handles that outlive the shutdown get
    /// [`CacheError::Released`] on access; direct store lookups of released
    /// ids get [`CacheError::UnknownBuffer`].
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(mut daemon) = self.daemon.lock().take() {
            daemon.shutdown();
            daemon.join();
        }

        self.log_stats();
        let buffers = self.store.release_all();
        let metadata = self.metadata.release_all();
        self.store.spill_manager().purge();
        debug!(buffers, metadata, "Grid cache shut down");
    }
}

impl Drop for GridCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for GridCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridCache")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferShape, GridBuffer};
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_cache() -> (GridCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::new()
            .with_spill_directory(temp_dir.path())
            .with_housekeeping_interval(Duration::ZERO)
            .with_min_spill_bytes(0);
        (GridCache::new(config).unwrap(), temp_dir)
    }

    #[test]
    fn test_new_creates_session_directory() {
        let (cache, temp) = create_cache();
        assert!(cache.session_dir().is_dir());
        assert!(cache.session_dir().starts_with(temp.path()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::new()
            .with_spill_directory(temp_dir.path())
            .with_budget_target_ratio(2.0);
        assert!(matches!(
            GridCache::new(config),
            Err(CacheError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_release_buffer_drops_metadata() {
        let (cache, _temp) = create_cache();
        let id = cache
            .store()
            .register(GridBuffer::filled(BufferShape::new(1, 4), 0.0));
        cache.metadata().get_or_produce(id, || Ok(42u32)).unwrap();

        assert!(cache.release_buffer(id));
        assert!(!cache.metadata().contains(id));
        assert!(!cache.release_buffer(id));
    }

    #[test]
    fn test_shutdown_purges_session() {
        let (cache, _temp) = create_cache();
        let id = cache
            .store()
            .register(GridBuffer::filled(BufferShape::new(1, 4), 1.0));
        cache.store().spill_entry(id).unwrap();
        let session = cache.session_dir().to_path_buf();

        cache.shutdown();
        cache.shutdown();

        assert!(cache.is_shut_down());
        assert_eq!(cache.store().size(), 0);
        assert!(!session.exists());
    }

    #[test]
    fn test_daemon_started_for_nonzero_interval() {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::new()
            .with_spill_directory(temp_dir.path())
            .with_housekeeping_interval(Duration::from_secs(60));
        let cache = GridCache::new(config).unwrap();

        assert!(cache
            .daemon
            .lock()
            .as_ref()
            .is_some_and(HousekeepingDaemon::is_running));
        cache.shutdown();
        assert!(cache.daemon.lock().is_none());
    }

    #[test]
    fn test_drop_removes_session() {
        let (cache, _temp) = create_cache();
        let session = cache.session_dir().to_path_buf();
        drop(cache);
        assert!(!session.exists());
    }
}
