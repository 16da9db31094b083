//! Safe removal of installed directory trees.
//!
//! Removal is rename-then-delete: the target is first renamed to a
//! reserved sibling (`toBeDeleted`), which is atomic at the filesystem
//! level, then deleted recursively. A crash between the two steps leaves
//! the content recoverable under the reserved name instead of
//! half-deleted under the original one; the next invocation sweeps it.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::ops::error::EnvError;

/// Reserved sibling name for content pending deletion.
pub const TO_BE_DELETED: &str = "toBeDeleted";

/// Remove `target` and everything under it. Idempotent: an already-absent
/// target is a no-op success.
///
/// A rename failure usually means another process holds a handle inside
/// the tree; that maps to [`EnvError::DirectoryLocked`], which is
/// recoverable by closing the blocking application and retrying.
pub fn safe_remove(target: &Path) -> Result<(), EnvError> {
    let parent = match target.parent() {
        Some(parent) => parent,
        None => {
            return Err(EnvError::Io(io::Error::other(
                "refusing to remove a filesystem root",
            )))
        }
    };
    let pending = parent.join(TO_BE_DELETED);

    // Sweep leftovers of a crashed prior removal first, so the rename
    // below always has a free slot.
    remove_tolerant(&pending)?;

    if !target.exists() {
        return Ok(());
    }

    debug!("renaming {} -> {}", target.display(), pending.display());
    fs::rename(target, &pending).map_err(|source| EnvError::DirectoryLocked {
        path: target.to_path_buf(),
        source,
    })?;

    remove_tolerant(&pending)
}

/// `remove_dir_all` that treats "already gone" as success.
fn remove_tolerant(path: &Path) -> Result<(), EnvError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EnvError::Io(e)),
    }
}
