//! Local install discovery.
//!
//! Scans the install root for environment directories. A directory counts
//! as an install only when the completed-install marker file exists under
//! its toolchain directory; partially unpacked or half-removed trees are
//! ignored. Reserved root entries (`downloads`, `toBeDeleted`) are skipped.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::ops::error::EnvError;
use crate::ops::remove::TO_BE_DELETED;
use crate::types::EnvVersion;
use crate::{INSTALL_MARKER, WEST_CONFIG};

/// One completed install found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInstall {
    pub version: EnvVersion,
    pub toolchain_dir: std::path::PathBuf,
    /// True when a completed repository sync exists alongside.
    pub west_present: bool,
}

/// Scan `root` for completed installs. A missing root is an empty result,
/// not an error.
pub fn scan_install_root(root: &Path) -> Result<Vec<LocalInstall>, EnvError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(EnvError::Io(e)),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == "downloads" || name == TO_BE_DELETED {
            continue;
        }

        let env_dir = entry.path();
        let toolchain_dir = env_dir.join("toolchain");
        if !toolchain_dir.join(INSTALL_MARKER).is_file() {
            debug!("skipping {}: no install marker", env_dir.display());
            continue;
        }

        found.push(LocalInstall {
            version: EnvVersion::new(name.as_ref()),
            toolchain_dir,
            west_present: env_dir.join(WEST_CONFIG).is_file(),
        });
    }

    found.sort_by(|a, b| b.version.cmp(&a.version));
    Ok(found)
}
