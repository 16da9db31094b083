//! Archive unpacking with platform-selected strategies.
//!
//! Three mutually exclusive strategies sit behind the [`Unpacker`] trait,
//! selected once per archive by [`unpacker_for`]:
//!
//! - [`ArchiveUnpacker`] iterates zip/tar.gz entries one at a time.
//! - [`DmgUnpacker`] mounts a disk image, copies its payload, and always
//!   detaches, even when the copy fails.
//! - [`PkgUnpacker`] delegates to the privileged OS package installer and
//!   replaces the destination with a symlink into the installed location.
//!
//! A failed unpack must not leave the destination looking installed; every
//! strategy removes the partially populated destination on error.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::io::dmg;
use crate::io::ProgressFn;
use crate::ops::cancel::CancelToken;
use crate::ops::error::EnvError;

/// Assumed average entry size when an archive format cannot report its
/// entry count up front. The resulting total is a heuristic only; callers
/// must not treat the percentages as authoritative.
const ESTIMATED_ENTRY_BYTES: u64 = 16 * 1024;

/// Where the privileged package installer places its payload.
const PKG_INSTALL_BASE: &str = "/opt";

/// Supported archive container kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    Dmg,
    Pkg,
}

/// Detect the archive kind from the file extension.
pub fn detect_kind(path: &Path) -> Option<ArchiveKind> {
    let name = path.to_string_lossy().to_lowercase();
    if name.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if name.ends_with(".dmg") {
        Some(ArchiveKind::Dmg)
    } else if name.ends_with(".pkg") {
        Some(ArchiveKind::Pkg)
    } else {
        None
    }
}

/// Extraction strategy seam. One concrete implementation per platform
/// class, selected at call time by [`unpacker_for`].
#[async_trait]
pub trait Unpacker: Send + Sync {
    async fn unpack(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: CancelToken,
        on_progress: ProgressFn,
    ) -> Result<(), EnvError>;
}

/// Select the strategy for an archive kind.
pub fn unpacker_for(kind: ArchiveKind) -> Box<dyn Unpacker> {
    match kind {
        ArchiveKind::Zip | ArchiveKind::TarGz => Box::new(ArchiveUnpacker),
        ArchiveKind::Dmg => Box::new(DmgUnpacker),
        ArchiveKind::Pkg => Box::new(PkgUnpacker),
    }
}

/// Monotonic, de-duplicated entry-count progress.
struct EntryProgress {
    total: u64,
    done: u64,
    last: Option<u8>,
}

impl EntryProgress {
    fn new(total: u64) -> Self {
        Self {
            total: total.max(1),
            done: 0,
            last: None,
        }
    }

    fn tick(&mut self, on_progress: &mut ProgressFn) {
        self.done += 1;
        let percent = ((self.done * 100 / self.total).min(100)) as u8;
        if self.last.map_or(true, |p| percent > p) {
            self.last = Some(percent);
            on_progress(percent);
        }
    }

    fn finish(&mut self, on_progress: &mut ProgressFn) {
        if self.last != Some(100) {
            self.last = Some(100);
            on_progress(100);
        }
    }
}

/// Entry-at-a-time extraction for zip and tar.gz archives.
pub struct ArchiveUnpacker;

#[async_trait]
impl Unpacker for ArchiveUnpacker {
    async fn unpack(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: CancelToken,
        on_progress: ProgressFn,
    ) -> Result<(), EnvError> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        let dest_cleanup = dest.clone();

        let result = tokio::task::spawn_blocking(move || {
            let mut on_progress = on_progress;
            match detect_kind(&archive) {
                Some(ArchiveKind::Zip) => {
                    extract_zip_entries(&archive, &dest, &cancel, &mut on_progress)
                }
                Some(ArchiveKind::TarGz) => {
                    extract_targz_entries(&archive, &dest, &cancel, &mut on_progress)
                }
                _ => Err(EnvError::Unpack(format!(
                    "unsupported archive: {}",
                    archive.display()
                ))),
            }
        })
        .await
        .map_err(|e| EnvError::Unpack(format!("extraction task failed: {e}")))?;

        if result.is_err() {
            // Never leave a half-populated destination behind.
            let _ = fs::remove_dir_all(&dest_cleanup);
        }
        result
    }
}

/// Fold an IO failure inside a strategy into the unpack taxonomy.
fn unpack_io(what: &str, e: std::io::Error) -> EnvError {
    EnvError::Unpack(format!("{what}: {e}"))
}

fn extract_zip_entries(
    archive: &Path,
    dest: &Path,
    cancel: &CancelToken,
    on_progress: &mut ProgressFn,
) -> Result<(), EnvError> {
    let file = File::open(archive).map_err(|e| unpack_io("open archive", e))?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| EnvError::Unpack(format!("bad zip: {e}")))?;

    fs::create_dir_all(dest).map_err(|e| unpack_io("create destination", e))?;
    let mut progress = EntryProgress::new(zip.len() as u64);

    for i in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(EnvError::Aborted);
        }

        let mut entry = zip
            .by_index(i)
            .map_err(|e| EnvError::Unpack(format!("zip entry {i}: {e}")))?;
        let relative = match entry.enclosed_name() {
            Some(path) => path,
            // Entries escaping the destination are dropped, not extracted.
            None => continue,
        };

        let absolute = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&absolute).map_err(|e| unpack_io("create directory", e))?;
        } else {
            if let Some(parent) = absolute.parent() {
                fs::create_dir_all(parent).map_err(|e| unpack_io("create directory", e))?;
            }
            let mut out = File::create(&absolute).map_err(|e| unpack_io("create file", e))?;
            std::io::copy(&mut entry, &mut out).map_err(|e| unpack_io("write file", e))?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&absolute, fs::Permissions::from_mode(mode))
                    .map_err(|e| unpack_io("set permissions", e))?;
            }
        }

        progress.tick(on_progress);
    }

    progress.finish(on_progress);
    Ok(())
}

fn extract_targz_entries(
    archive: &Path,
    dest: &Path,
    cancel: &CancelToken,
    on_progress: &mut ProgressFn,
) -> Result<(), EnvError> {
    let archive_size = fs::metadata(archive)
        .map_err(|e| unpack_io("read archive metadata", e))?
        .len();
    let file = File::open(archive).map_err(|e| unpack_io("open archive", e))?;
    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    let mut tar = tar::Archive::new(decoder);

    fs::create_dir_all(dest).map_err(|e| unpack_io("create destination", e))?;
    // tar streams cannot report a total up front; estimate from size.
    let mut progress = EntryProgress::new(archive_size / ESTIMATED_ENTRY_BYTES);

    for entry in tar
        .entries()
        .map_err(|e| EnvError::Unpack(format!("bad tar: {e}")))?
    {
        if cancel.is_cancelled() {
            return Err(EnvError::Aborted);
        }

        let mut entry = entry.map_err(|e| EnvError::Unpack(format!("tar entry: {e}")))?;
        let raw = entry
            .path()
            .map_err(|e| EnvError::Unpack(format!("tar entry path: {e}")))?
            .into_owned();

        // Entries may only descend from the destination. A lexical
        // starts_with check is not enough: `..` components survive a
        // plain join, so they are rejected outright.
        let mut relative = PathBuf::new();
        for component in raw.components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(EnvError::Unpack(format!(
                        "invalid path in archive: {}",
                        raw.display()
                    )))
                }
            }
        }
        let absolute = dest.join(&relative);

        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&absolute).map_err(|e| unpack_io("create directory", e))?;
            continue;
        }
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).map_err(|e| unpack_io("create directory", e))?;
        }
        entry
            .unpack(&absolute)
            .map_err(|e| EnvError::Unpack(format!("tar unpack: {e}")))?;

        progress.tick(on_progress);
    }

    progress.finish(on_progress);
    Ok(())
}

/// Mount-and-copy extraction for disk images.
pub struct DmgUnpacker;

#[async_trait]
impl Unpacker for DmgUnpacker {
    async fn unpack(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: CancelToken,
        on_progress: ProgressFn,
    ) -> Result<(), EnvError> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        let dest_cleanup = dest.clone();

        let result = tokio::task::spawn_blocking(move || {
            let mut on_progress = on_progress;
            let mount = dmg::attach(&archive)?;
            // The mount guard detaches on drop, so the volume is released
            // whether or not the copy below succeeds.
            copy_mounted_payload(&mount.path, &dest, &cancel, &mut on_progress)
        })
        .await
        .map_err(|e| EnvError::Unpack(format!("copy task failed: {e}")))?;

        if result.is_err() {
            let _ = fs::remove_dir_all(&dest_cleanup);
        }
        result
    }
}

fn copy_mounted_payload(
    volume: &Path,
    dest: &Path,
    cancel: &CancelToken,
    on_progress: &mut ProgressFn,
) -> Result<(), EnvError> {
    let files: Vec<PathBuf> = walkdir::WalkDir::new(volume)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();

    let mut progress = EntryProgress::new(files.len() as u64);

    for src in &files {
        if cancel.is_cancelled() {
            return Err(EnvError::Aborted);
        }

        let relative = src
            .strip_prefix(volume)
            .map_err(|_| EnvError::Unpack("file outside mounted volume".into()))?;
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| unpack_io("create directory", e))?;
        }
        fs::copy(src, &target).map_err(|e| unpack_io("copy file", e))?;
        progress.tick(on_progress);
    }

    progress.finish(on_progress);
    Ok(())
}

/// Privileged package-installer extraction. No fine-grained progress is
/// available mid-install, so progress jumps to near-complete once the
/// installer returns.
pub struct PkgUnpacker;

#[async_trait]
impl Unpacker for PkgUnpacker {
    async fn unpack(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: CancelToken,
        mut on_progress: ProgressFn,
    ) -> Result<(), EnvError> {
        if cancel.is_cancelled() {
            return Err(EnvError::Aborted);
        }

        let mut child = tokio::process::Command::new("installer")
            .arg("-pkg")
            .arg(archive)
            .arg("-target")
            .arg("/")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| EnvError::Unpack(format!("failed to run installer: {e}")))?;

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| unpack_io("wait for installer", e))?,
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                return Err(EnvError::Aborted);
            }
        };

        if !status.success() {
            return Err(EnvError::Unpack(format!(
                "package installer exited with {status}"
            )));
        }
        on_progress(99);

        let stem = archive
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EnvError::Unpack("package has no file stem".into()))?;
        let installed = Path::new(PKG_INSTALL_BASE).join(stem);

        // Replace the destination with a link into the installed payload.
        if dest.exists() {
            fs::remove_dir_all(dest).map_err(|e| unpack_io("clear destination", e))?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| unpack_io("create directory", e))?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(&installed, dest).map_err(|e| unpack_io("link payload", e))?;
        #[cfg(not(unix))]
        return Err(EnvError::Unpack(
            "privileged package install is not supported on this platform".into(),
        ));

        on_progress(100);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path, entries: usize) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for i in 0..entries {
            writer
                .start_file(format!("dir{}/file{i}.txt", i % 3), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(format!("entry {i}").as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn recorder() -> (Arc<Mutex<Vec<u8>>>, ProgressFn) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let f: ProgressFn = Box::new(move |p| sink.lock().unwrap().push(p));
        (seen, f)
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(detect_kind(Path::new("tc.zip")), Some(ArchiveKind::Zip));
        assert_eq!(detect_kind(Path::new("tc.TAR.GZ")), Some(ArchiveKind::TarGz));
        assert_eq!(detect_kind(Path::new("tc.tgz")), Some(ArchiveKind::TarGz));
        assert_eq!(detect_kind(Path::new("tc.dmg")), Some(ArchiveKind::Dmg));
        assert_eq!(detect_kind(Path::new("tc.pkg")), Some(ArchiveKind::Pkg));
        assert_eq!(detect_kind(Path::new("tc.bin")), None);
    }

    #[tokio::test]
    async fn test_zip_extraction_progress_is_monotonic() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tc.zip");
        build_zip(&archive, 25);

        let dest = dir.path().join("out");
        let (seen, on_progress) = recorder();
        ArchiveUnpacker
            .unpack(&archive, &dest, CancelToken::new(), on_progress)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*seen.last().unwrap(), 100);
        assert!(dest.join("dir0/file0.txt").exists());
    }

    #[tokio::test]
    async fn test_cancel_mid_extraction_removes_dest() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tc.zip");
        build_zip(&archive, 40);

        let dest = dir.path().join("out");
        let token = CancelToken::new();
        let trigger = token.clone();
        // Signal from the progress callback at a synthetic 70%: the next
        // per-entry cancellation check observes it deterministically.
        let on_progress: ProgressFn = Box::new(move |p| {
            if p >= 70 {
                trigger.signal();
            }
        });

        let err = ArchiveUnpacker
            .unpack(&archive, &dest, token, on_progress)
            .await
            .unwrap_err();
        assert!(err.is_aborted());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_targz_extraction() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tc.tar.gz");
        {
            let file = File::create(&archive).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
            let mut builder = tar::Builder::new(encoder);
            let payload = b"hello toolchain";
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "bin/tool", payload.as_slice())
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = dir.path().join("out");
        let (_, on_progress) = recorder();
        ArchiveUnpacker
            .unpack(&archive, &dest, CancelToken::new(), on_progress)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.join("bin/tool")).unwrap(),
            "hello toolchain"
        );
    }

    /// A well-behaved builder refuses `..` in entry names, so the name
    /// bytes go straight into the header, the way a hostile archive
    /// would carry them.
    fn build_targz_with_raw_name(path: &Path, entry_name: &str) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        let payload = b"escaped";
        let mut header = tar::Header::new_gnu();
        {
            let name = &mut header.as_gnu_mut().unwrap().name;
            name[..entry_name.len()].copy_from_slice(entry_name.as_bytes());
        }
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, payload.as_slice()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[tokio::test]
    async fn test_tar_parent_dir_entry_is_rejected() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tc.tar.gz");
        build_targz_with_raw_name(&archive, "../escaped.txt");

        let dest = dir.path().join("container/out");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        let (_, on_progress) = recorder();
        let err = ArchiveUnpacker
            .unpack(&archive, &dest, CancelToken::new(), on_progress)
            .await
            .unwrap_err();

        assert!(matches!(err, EnvError::Unpack(_)));
        // Nothing climbed out of the destination.
        assert!(!dir.path().join("container/escaped.txt").exists());
        assert!(!dir.path().join("escaped.txt").exists());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_unwritable_dest_is_unpack_error() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tc.zip");
        build_zip(&archive, 2);

        // A regular file where the destination directory should go.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let (_, on_progress) = recorder();
        let err = ArchiveUnpacker
            .unpack(&archive, &blocker.join("out"), CancelToken::new(), on_progress)
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::Unpack(_)));
    }

    #[tokio::test]
    async fn test_corrupt_zip_cleans_dest() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("tc.zip");
        std::fs::write(&archive, b"this is not a zip archive").unwrap();

        let dest = dir.path().join("out");
        let (_, on_progress) = recorder();
        let err = ArchiveUnpacker
            .unpack(&archive, &dest, CancelToken::new(), on_progress)
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::Unpack(_)));
        assert!(!dest.exists());
    }
}
