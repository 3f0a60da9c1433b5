//! Process-wide grid cache instance.
//!
//! Applications that want a single shared cache call [`init`] once at
//! startup and [`shutdown`] on exit. Libraries and tests should prefer
//! passing an explicit `Arc<GridCache>`.

use crate::cache::system::GridCache;
use crate::cache::types::CacheError;
use crate::config::CacheConfig;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

static GLOBAL_CACHE: OnceLock<RwLock<Option<Arc<GridCache>>>> = OnceLock::new();

fn slot() -> &'static RwLock<Option<Arc<GridCache>>> {
    GLOBAL_CACHE.get_or_init(|| RwLock::new(None))
}

/// Create the global cache.
///
/// Fails with [`CacheError::AlreadyInitialized`] if a global cache exists.
pub fn init(config: CacheConfig) -> Result<Arc<GridCache>, CacheError> {
    let mut global = slot().write();
    if global.is_some() {
        return Err(CacheError::AlreadyInitialized);
    }
    let cache = Arc::new(GridCache::new(config)?);
    *global = Some(Arc::clone(&cache));
    Ok(cache)
}

/// The global cache.
pub fn get() -> Result<Arc<GridCache>, CacheError> {
    slot().read().clone().ok_or(CacheError::NotInitialized)
}

pub fn is_initialized() -> bool {
    slot().read().is_some()
}

/// Shut down and remove the global cache. Returns `false` if none existed.
///
/// Clones of the `Arc` obtained earlier stay valid but their entries are
/// released.
pub fn shutdown() -> bool {
    let cache = slot().write().take();
    match cache {
        Some(cache) => {
            cache.shutdown();
            true
        }
        None => false,
    }
}
