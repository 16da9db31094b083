//! Remote environment index.
//!
//! The index is a JSON document listing every published environment
//! version with its toolchain archives and checksums. Archive names are
//! relative to the index URL's directory unless the entry carries an
//! explicit `uri` override.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::ops::error::EnvError;
use crate::types::{EnvVersion, Toolchain};
use crate::{base_url_dir, USER_AGENT};

/// One published environment version.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    pub version: EnvVersion,
    #[serde(default)]
    pub toolchains: Vec<Toolchain>,
    /// Installed through an external SDK tool; such environments get the
    /// tool's own uninstall before directory removal.
    #[serde(default)]
    pub managed: bool,
}

/// Fetch and parse the remote index, newest version first.
pub async fn fetch_index(client: &Client, index_url: &str) -> Result<Vec<IndexEntry>, EnvError> {
    debug!("fetching index from {index_url}");
    let response = client
        .get(index_url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| EnvError::network(index_url, &e.to_string()))?
        .error_for_status()
        .map_err(|e| EnvError::network(index_url, &e.to_string()))?;

    let mut entries: Vec<IndexEntry> = response
        .json()
        .await
        .map_err(|e| EnvError::network(index_url, &format!("invalid index: {e}")))?;

    entries.sort_by(|a, b| b.version.cmp(&a.version));
    Ok(entries)
}

/// Resolve the download URL of a toolchain archive.
///
/// An explicit `uri` on the entry wins; otherwise the archive name is
/// appended to the index URL's directory.
pub fn download_url(index_url: &str, toolchain: &Toolchain) -> String {
    match &toolchain.uri {
        Some(uri) => uri.clone(),
        None => format!("{}/{}", base_url_dir(index_url), toolchain.name),
    }
}
