//! Command modules - one file per CLI command

pub mod install;
pub mod list;
pub mod remove;
pub mod update;

use std::io::Write;

use anyhow::{Context, Result};
use sdkenv::{EnvConfig, EnvManager};

/// Build a manager rooted at the default (or overridden) install root.
pub(crate) fn manager(index_url: &str) -> Result<EnvManager> {
    let root = sdkenv::try_install_root().context("Could not determine home directory")?;
    Ok(EnvManager::new(EnvConfig::new(root, index_url)))
}

/// Interactive y/n prompt; anything but an explicit yes declines.
pub(crate) fn prompt_yes_no(question: &str) -> bool {
    print!("{question} [y/N] ");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}
