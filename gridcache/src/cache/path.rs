//! Spill file naming.
//!
//! Every cache instance writes into its own session directory so two
//! stores sharing a spill root never see each other's files:
//!
//! ```text
//! <spill_dir>/session-<uuid>/grid-<n>.spill
//! <spill_dir>/session-<uuid>/grid-<n>.aux
//! ```

use crate::cache::types::BufferId;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension of buffer spill files.
pub const SPILL_EXTENSION: &str = "spill";

/// Extension of aux metadata files.
pub const METADATA_EXTENSION: &str = "aux";

/// Suffix appended while a file is being written.
const TEMP_SUFFIX: &str = "tmp";

/// Directory name for one cache session.
pub fn session_directory(spill_dir: &Path, session: Uuid) -> PathBuf {
    spill_dir.join(format!("session-{}", session.simple()))
}

/// Path of the spill file for a buffer.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use gridcache::cache::{spill_path, BufferId};
///
/// let path = spill_path(Path::new("/tmp/s"), BufferId::from_raw(7));
/// assert_eq!(path, Path::new("/tmp/s/grid-7.spill"));
/// ```
pub fn spill_path(session_dir: &Path, id: BufferId) -> PathBuf {
    session_dir.join(format!("{}.{}", id, SPILL_EXTENSION))
}

/// Path of the aux metadata file for a root buffer.
pub fn metadata_path(session_dir: &Path, id: BufferId) -> PathBuf {
    session_dir.join(format!("{}.{}", id, METADATA_EXTENSION))
}

/// Temporary sibling used for write-then-rename.
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(".");
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Parse a spill or metadata file name back to its buffer id.
///
/// Returns `None` for anything that is not `grid-<n>.spill` or
/// `grid-<n>.aux`.
pub fn id_from_file_name(file_name: &str) -> Option<BufferId> {
    let stem = file_name
        .strip_suffix(SPILL_EXTENSION)
        .or_else(|| file_name.strip_suffix(METADATA_EXTENSION))?
        .strip_suffix('.')?;
    let raw = stem.strip_prefix("grid-")?;
    raw.parse().ok().map(BufferId::from_raw)
}
