//! Pre-install directory conflict detection.
//!
//! A stray `.west` metadata directory anywhere above the install target
//! would misdirect the repository synchronizer and corrupt a fresh
//! install. Before installing, the target path and its ancestors are
//! walked upward toward the filesystem root; any marker found is offered
//! for removal through a caller-supplied decision callback.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::ops::error::EnvError;
use crate::ops::remove::safe_remove;
use crate::WEST_MARKER_DIR;

/// Find the closest stray marker directory at or above `start`.
///
/// The walk terminates at the filesystem root (a path whose parent
/// resolves to itself, i.e. has no parent).
pub fn find_stray_marker(start: &Path) -> Option<PathBuf> {
    for ancestor in start.ancestors() {
        let candidate = ancestor.join(WEST_MARKER_DIR);
        if candidate.is_dir() {
            return Some(candidate);
        }
    }
    None
}

/// Ensure nothing above `target` will conflict with a fresh install.
///
/// Every marker found is put to `accept_removal`; acceptance removes it
/// via the safe remover and restarts the walk from the top, catching
/// nested conflicts introduced by partial prior installs. Declining, or a
/// failed removal, aborts with [`EnvError::DirectoryConflict`].
pub fn ensure_clean_target_dir(
    target: &Path,
    accept_removal: &(dyn Fn(&Path) -> bool + Sync),
) -> Result<(), EnvError> {
    loop {
        let marker = match find_stray_marker(target) {
            Some(marker) => marker,
            None => return Ok(()),
        };

        if !accept_removal(&marker) {
            return Err(EnvError::DirectoryConflict(format!(
                "refusing to install over stray {} at {}",
                WEST_MARKER_DIR,
                marker.display()
            )));
        }

        if let Err(e) = safe_remove(&marker) {
            warn!("failed to remove conflicting {}: {e}", marker.display());
            return Err(EnvError::DirectoryConflict(format!(
                "could not remove {}: {e}",
                marker.display()
            )));
        }
    }
}
