//! sdkenv - versioned SDK/toolchain environment manager
//!
//! Manages the lifecycle of versioned development-toolchain bundles
//! ("environments") on a developer machine: discovering what is locally
//! installed, downloading and verifying remote packages, unpacking them,
//! running a secondary repository-synchronization step, and safely
//! removing them.
//!
//! # Architecture
//!
//! - **Orchestrator**: [`ops::EnvManager`] sequences the pipeline stages
//!   (conflict check, download, unpack, repository sync) and owns all
//!   per-environment state.
//! - **Reporter seam**: progress and state changes are delivered through
//!   the [`ui::Reporter`] trait instead of a global event bus, so the
//!   presentation layer stays out of the core.
//! - **Cancellation**: one [`ops::CancelToken`] per in-flight operation,
//!   held in an arena keyed by environment version. Cancelling one
//!   environment never affects another.
//!
//! # Directory Layout
//!
//! ```text
//! <install root>/
//! ├── downloads/          # Fetched archives, reusable across retries
//! ├── toBeDeleted/        # Transient rename target of the safe remover
//! └── <version>/
//!     ├── toolchain/      # Unpacked toolchain content
//!     │   └── ncsmgr/manifest.env   # Installed marker
//!     └── .west/          # Secondary repository metadata
//! ```

pub mod core;
pub mod io;
pub mod ops;
pub mod types;
pub mod ui;

// Re-exports for convenience
pub use ops::error::EnvError;
pub use ops::install::{EnvConfig, EnvManager};
pub use types::{EnvVersion, Environment, Sha512Digest, Toolchain};

use std::path::{Path, PathBuf};

/// User Agent string sent with every HTTP request.
pub const USER_AGENT: &str = concat!("sdkenv/", env!("CARGO_PKG_VERSION"));

/// Marker file, relative to a toolchain directory, whose presence is the
/// sole signal that a completed install exists there.
pub const INSTALL_MARKER: &str = "ncsmgr/manifest.env";

/// Metadata directory created by the repository synchronizer. A stray copy
/// of this directory above an install target corrupts a fresh install.
pub const WEST_MARKER_DIR: &str = ".west";

/// File inside the west marker directory that confirms a completed sync.
pub const WEST_CONFIG: &str = ".west/config";

/// Returns the install root, honouring the `SDKENV_ROOT` override.
///
/// # Panics
/// Panics if neither `SDKENV_ROOT` nor the home directory can be resolved.
pub fn default_install_root() -> PathBuf {
    try_install_root().expect("Could not determine home directory")
}

/// Returns the install root, or None if the user's home cannot be resolved.
pub fn try_install_root() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("SDKENV_ROOT") {
        return Some(PathBuf::from(val));
    }
    dirs::home_dir().map(|h| h.join(".sdkenv"))
}

/// Downloads directory: `<root>/downloads`
pub fn downloads_path(root: &Path) -> PathBuf {
    root.join("downloads")
}

/// Environment directory: `<root>/<version>`
pub fn env_dir(root: &Path, version: &types::EnvVersion) -> PathBuf {
    root.join(version.as_str())
}

/// Toolchain directory: `<root>/<version>/toolchain`
pub fn toolchain_dir(root: &Path, version: &types::EnvVersion) -> PathBuf {
    env_dir(root, version).join("toolchain")
}

/// Extract the filename from a URL.
///
/// # Example
///
/// ```
/// use sdkenv::filename_from_url;
///
/// assert_eq!(filename_from_url("https://example.com/a/b/tc.zip"), "tc.zip");
/// assert_eq!(filename_from_url(""), "");
/// ```
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}

/// Strip the last path segment of a URL, leaving its directory.
///
/// `https://example.com/sdk/index.json` becomes `https://example.com/sdk`.
pub fn base_url_dir(url: &str) -> &str {
    match url.rfind('/') {
        Some(idx) => &url[..idx],
        None => url,
    }
}
