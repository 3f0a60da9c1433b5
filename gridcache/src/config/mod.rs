//! Configuration for the grid cache.
//!
//! [`CacheConfig`] is the runtime configuration handed to
//! [`GridCache::new`](crate::cache::GridCache::new). [`ConfigFile`] is the
//! on-disk INI form (`~/.gridcache/config.ini`) and converts into a
//! `CacheConfig` with [`ConfigFile::to_cache_config`].
//!
//! # Example
//!
//! ```
//! use gridcache::config::{CacheConfig, ConfigFile};
//!
//! let config = ConfigFile::default().to_cache_config();
//! assert_eq!(config, CacheConfig::default());
//! ```

mod cache;
pub(crate) mod defaults;
mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use cache::CacheConfig;
pub use defaults::{
    default_log_directory, default_spill_directory, DEFAULT_BUDGET_TARGET_RATIO,
    DEFAULT_HOUSEKEEPING_INTERVAL_SECS, DEFAULT_LOG_FILE_NAME,
    DEFAULT_MIN_SPILL_BYTES, DEFAULT_RESIDENT_BUDGET,
};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{CacheSettings, ConfigFile, LoggingSettings};
pub use size::{format_size, parse_size, SizeParseError};
