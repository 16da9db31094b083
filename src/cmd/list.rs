//! List command

use anyhow::{Context, Result};

/// List all known environments, newest first.
pub async fn list(index_url: &str) -> Result<()> {
    let mgr = crate::cmd::manager(index_url)?;
    if let Err(e) = mgr.refresh_index().await {
        eprintln!("warning: could not reach the index: {e}");
    }
    mgr.discover_local()
        .context("Failed to scan the install root")?;

    let envs = mgr.environments();
    if envs.is_empty() {
        println!("No environments known.");
        println!("Run 'sdkenv install <version>' once the index is reachable.");
        return Ok(());
    }

    for env in envs {
        let status = if env.is_installed() {
            if env.west_present {
                "installed"
            } else {
                "installed (repositories missing)"
            }
        } else {
            "available"
        };
        println!("  {:<12} {status}", env.version.as_str());
    }

    Ok(())
}
