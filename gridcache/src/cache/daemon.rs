//! Background daemon for cache housekeeping.
//!
//! The daemon runs in a separate thread and periodically spills idle
//! buffers and enforces the resident memory budget.

use crate::cache::store::BufferStore;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Background daemon running [`BufferStore::housekeep`] on an interval.
///
/// The daemon can be cleanly shut down by calling `shutdown()` and `join()`,
/// or by dropping the `HousekeepingDaemon` instance.
pub struct HousekeepingDaemon {
    /// Handle to the daemon thread
    thread_handle: Option<JoinHandle<()>>,
    /// Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl HousekeepingDaemon {
    /// Start a new housekeeping daemon.
    ///
    /// # Arguments
    ///
    /// * `store` - Store to keep within its policy
    /// * `interval` - Time between passes
    pub fn start(store: Arc<BufferStore>, interval: Duration) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let thread_handle = thread::Builder::new()
            .name("gridcache-housekeeping".to_string())
            .spawn(move || {
                Self::run_loop(store, interval, shutdown_clone);
            })?;

        info!(interval_ms = interval.as_millis() as u64, "Housekeeping daemon started");

        Ok(Self {
            thread_handle: Some(thread_handle),
            shutdown,
        })
    }

    /// The main daemon loop.
    fn run_loop(store: Arc<BufferStore>, interval: Duration, shutdown: Arc<AtomicBool>) {
        let mut next_pass = Instant::now() + interval;

        loop {
            if shutdown.load(Ordering::Acquire) {
                debug!("Housekeeping daemon received shutdown signal");
                break;
            }

            let now = Instant::now();
            if now < next_pass {
                // Woken early by unpark on shutdown, or spuriously
                thread::park_timeout(next_pass - now);
                continue;
            }

            let report = store.housekeep();
            if report.is_empty() {
                debug!(
                    entries = store.size(),
                    resident = store.resident_bytes(),
                    "Housekeeping pass found nothing to spill"
                );
            }
            next_pass = Instant::now() + interval;
        }

        debug!("Housekeeping daemon stopped");
    }

    /// Signal the daemon to shut down.
    ///
    /// This is non-blocking. Call `join()` after this to wait for the
    /// thread to finish.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = &self.thread_handle {
            handle.thread().unpark();
        }
    }

    /// Wait for the daemon thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                warn!("Housekeeping daemon thread panicked: {:?}", e);
            }
        }
    }

    /// Check if the daemon is still running.
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for HousekeepingDaemon {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferShape, GridBuffer};
    use crate::cache::policy::EvictionPolicy;
    use crate::cache::spill::SpillManager;
    use crate::cache::types::EntryState;
    use tempfile::TempDir;

    fn create_store(idle: Duration) -> (Arc<BufferStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let spill = Arc::new(SpillManager::new(temp_dir.path()).unwrap());
        let policy = EvictionPolicy {
            idle_clear_delay: Some(idle),
            resident_budget: None,
            budget_target_ratio: 1.0,
            min_spill_bytes: 0,
        };
        (Arc::new(BufferStore::new(spill, policy)), temp_dir)
    }

    #[test]
    fn test_daemon_starts_and_stops() {
        let (store, _temp) = create_store(Duration::from_secs(60));

        let mut daemon = HousekeepingDaemon::start(store, Duration::from_secs(3600)).unwrap();
        assert!(daemon.is_running());

        let started = Instant::now();
        daemon.shutdown();
        daemon.join();

        assert!(!daemon.is_running());
        assert!(started.elapsed() < Duration::from_secs(5), "shutdown must not wait for the interval");
    }

    #[test]
    fn test_daemon_spills_idle_buffers() {
        let (store, _temp) = create_store(Duration::from_millis(20));
        let id = store.register(GridBuffer::filled(BufferShape::new(1, 64), 2.5));

        let _daemon = HousekeepingDaemon::start(Arc::clone(&store), Duration::from_millis(10)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.state(id).unwrap() != EntryState::Spilled {
            assert!(Instant::now() < deadline, "daemon never spilled the idle buffer");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(store.resident_bytes(), 0);
    }

    #[test]
    fn test_daemon_drop_triggers_shutdown() {
        let (store, _temp) = create_store(Duration::from_secs(60));

        {
            let _daemon = HousekeepingDaemon::start(Arc::clone(&store), Duration::from_secs(3600)).unwrap();
        }

        // Only the test's handle remains once the thread has exited
        assert_eq!(Arc::strong_count(&store), 1);
    }
}
