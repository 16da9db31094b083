//! Disk-image handling via hdiutil.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::ops::error::EnvError;

/// A mounted disk image. Dropping this struct detaches the volume, so a
/// failed copy never leaks a mounted volume.
pub struct MountPoint {
    pub path: PathBuf,
    detached: bool,
}

impl MountPoint {
    /// Detach explicitly, surfacing the error instead of swallowing it.
    pub fn detach(mut self) -> Result<(), EnvError> {
        self.detached = true;
        detach(&self.path)
    }
}

impl Drop for MountPoint {
    fn drop(&mut self) {
        if !self.detached {
            let _ = detach(&self.path);
        }
    }
}

/// Attach a disk image read-only and return its mount point.
pub fn attach(image_path: &Path) -> Result<MountPoint, EnvError> {
    let output = Command::new("hdiutil")
        .arg("attach")
        .arg("-nobrowse")
        .arg("-readonly")
        .arg(image_path)
        .output()
        .map_err(|e| EnvError::Unpack(format!("failed to execute hdiutil: {e}")))?;

    if !output.status.success() {
        return Err(EnvError::Unpack(format!(
            "hdiutil attach failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // Output format: /dev/diskXsY <TYPE> <MOUNTPOINT>
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(idx) = line.find("/Volumes/") {
            return Ok(MountPoint {
                path: PathBuf::from(line[idx..].trim()),
                detached: false,
            });
        }
    }

    Err(EnvError::Unpack(
        "could not find mount point in hdiutil output".into(),
    ))
}

/// Detach a volume, retrying while the resource is busy.
pub fn detach(mount_point: &Path) -> Result<(), EnvError> {
    for _ in 0..3 {
        let status = Command::new("hdiutil")
            .arg("detach")
            .arg(mount_point)
            .arg("-force")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        if let Ok(s) = status {
            if s.success() {
                return Ok(());
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(500));
    }

    Err(EnvError::Unpack(format!(
        "failed to detach {}",
        mount_point.display()
    )))
}
