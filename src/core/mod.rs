//! Core read-only views of the world: the remote environment index and
//! the local filesystem scan.

pub mod discover;
pub mod index;

pub use discover::{scan_install_root, LocalInstall};
pub use index::{download_url, fetch_index, IndexEntry};
