//! Logging setup for applications embedding the grid cache.
//!
//! The library itself only emits `tracing` events. Binaries call
//! [`init_logging`] (or [`init_from_settings`]) once to route them:
//! - Writes to `<directory>/<file>` (cleared on session start)
//! - Also prints to stderr
//! - Configurable via RUST_LOG environment variable

use crate::config::{default_log_directory, LoggingSettings, DEFAULT_LOG_FILE_NAME};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard will flush and close the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize logging.
///
/// Creates the log directory if needed, clears the previous log file, and
/// installs a global subscriber writing to both the file and stderr.
///
/// # Errors
///
/// Returns an error if the log file cannot be prepared or a global
/// subscriber is already installed.
pub fn init_logging(log_dir: &Path, log_file: &str) -> io::Result<LoggingGuard> {
    let (file_writer, file_guard) = file_writer(log_dir, log_file)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_thread_names(true);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    // Defaults to INFO if RUST_LOG is not set
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Initialize logging from the `[logging]` config section.
pub fn init_from_settings(settings: &LoggingSettings) -> io::Result<LoggingGuard> {
    init_logging(&settings.directory, &settings.file)
}

/// Default log directory (`~/.gridcache/logs`).
pub fn default_log_dir() -> PathBuf {
    default_log_directory()
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    DEFAULT_LOG_FILE_NAME
}

/// Prepare an empty log file and a non-blocking writer for it.
fn file_writer(log_dir: &Path, log_file: &str) -> io::Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    Ok(tracing_appender::non_blocking(file_appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    // init_logging installs a global subscriber, so only the file handling
    // is tested here.

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_file(), "gridcache.log");
        assert!(default_log_dir().ends_with("logs"));
    }

    #[test]
    fn test_file_writer_creates_nested_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("deep/nested");

        let (_writer, _guard) = file_writer(&log_dir, "test.log").unwrap();

        assert!(log_dir.join("test.log").exists());
    }

    #[test]
    fn test_file_writer_clears_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("test.log");
        fs::write(&log_path, "old log data").unwrap();

        let (_writer, _guard) = file_writer(temp_dir.path(), "test.log").unwrap();

        assert_eq!(fs::read_to_string(&log_path).unwrap(), "");
    }

    #[test]
    fn test_writes_reach_file_after_guard_drop() {
        let temp_dir = TempDir::new().unwrap();
        let (mut writer, guard) = file_writer(temp_dir.path(), "test.log").unwrap();

        writer.write_all(b"spilled grid-1\n").unwrap();
        drop(writer);
        drop(guard);

        let contents = fs::read_to_string(temp_dir.path().join("test.log")).unwrap();
        assert_eq!(contents, "spilled grid-1\n");
    }

    #[test]
    fn test_file_writer_rejects_file_as_directory() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        assert!(file_writer(&blocker, "test.log").is_err());
    }
}
