//! Remove command

use anyhow::{Context, Result};
use sdkenv::EnvVersion;

pub async fn remove(index_url: &str, version: &str, yes: bool) -> Result<()> {
    let mgr = crate::cmd::manager(index_url)?;
    mgr.discover_local()
        .context("Failed to scan the install root")?;

    let version = EnvVersion::new(version);
    match mgr.environment(&version) {
        Some(env) if env.is_installed() => {}
        _ => {
            println!("{} is not installed.", version.as_str());
            return Ok(());
        }
    }

    if !yes && !crate::cmd::prompt_yes_no(&format!("Remove {}?", version.as_str())) {
        println!("Aborted.");
        return Ok(());
    }

    mgr.remove(&version)
        .await
        .with_context(|| format!("Failed to remove {}", version.as_str()))?;
    println!("Removed {}", version.as_str());
    Ok(())
}
