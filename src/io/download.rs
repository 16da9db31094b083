//! Checksum downloader: streams a remote artifact to disk while
//! incrementally hashing it.
//!
//! Progress is `round(bytes_received / total_bytes * 100)`, reported only
//! on change. On completion the SHA-512 accumulator is compared to the
//! expected digest (case-insensitive hex); a mismatched file is deleted so
//! a retry never sees a false "already downloaded" signal.

use std::io::Read;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha512};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::io::ProgressFn;
use crate::ops::cancel::CancelToken;
use crate::ops::error::EnvError;
use crate::types::Sha512Digest;
use crate::USER_AGENT;

/// Stream `url` into `dest`, verifying against `expected` when known.
///
/// Verification is skipped only when no expected digest is supplied (the
/// locally-supplied package path). Cancellation is checked per chunk; a
/// cancelled or failed download removes the partial file.
pub async fn download_and_verify(
    client: &Client,
    url: &str,
    dest: &Path,
    expected: Option<&Sha512Digest>,
    cancel: &CancelToken,
    mut on_progress: ProgressFn,
) -> Result<PathBuf, EnvError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|e| EnvError::network(url, e))?
        .error_for_status()
        .map_err(|e| EnvError::network(url, e))?;

    let total_size = response.content_length().unwrap_or(0);
    let mut stream = response.bytes_stream();
    let mut file = File::create(dest).await?;
    let mut hasher = Sha512::new();
    let mut received: u64 = 0;
    let mut last_percent: Option<u8> = None;

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            drop(file);
            tokio::fs::remove_file(dest).await.ok();
            return Err(EnvError::Aborted);
        }

        let chunk = chunk.map_err(|e| EnvError::network(url, e))?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        received += chunk.len() as u64;

        if total_size > 0 {
            let percent = percent_of(received, total_size);
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                on_progress(percent);
            }
        }
    }

    file.flush().await?;
    drop(file);

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = expected {
        if !expected.matches(&actual) {
            tokio::fs::remove_file(dest).await.ok();
            return Err(EnvError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    if last_percent != Some(100) {
        on_progress(100);
    }

    Ok(dest.to_path_buf())
}

/// SHA-512 of a file on disk, hex-encoded. Used for download cache reuse;
/// call through `spawn_blocking` for large archives.
pub fn sha512_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha512::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn percent_of(received: u64, total: u64) -> u8 {
    (((received as f64 / total as f64) * 100.0).round() as u64).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_rounds() {
        assert_eq!(percent_of(1, 1000), 0);
        assert_eq!(percent_of(5, 1000), 1);
        assert_eq!(percent_of(500, 1000), 50);
        assert_eq!(percent_of(1000, 1000), 100);
    }

    #[test]
    fn test_sha512_file_matches_hasher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"toolchain payload").unwrap();

        let expected = hex::encode(Sha512::digest(b"toolchain payload"));
        assert_eq!(sha512_file(&path).unwrap(), expected);
    }
}
