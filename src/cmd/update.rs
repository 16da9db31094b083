//! Update command: re-run the install pipeline with an in-place
//! repository update.

use std::path::Path;

use anyhow::{Context, Result};
use sdkenv::EnvVersion;

pub async fn update(index_url: &str, version: &str, yes: bool) -> Result<()> {
    let mgr = crate::cmd::manager(index_url)?;
    mgr.refresh_index()
        .await
        .context("Failed to fetch the environment index")?;
    mgr.discover_local()
        .context("Failed to scan the install root")?;

    let version = EnvVersion::new(version);

    {
        let mgr = mgr.clone();
        let version = version.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling...");
                mgr.cancel(&version);
            }
        });
    }

    let accept = move |marker: &Path| {
        yes || crate::cmd::prompt_yes_no(&format!(
            "A conflicting west workspace exists at {}. Remove it?",
            marker.display()
        ))
    };
    mgr.update_toolchain(&version, &accept)
        .await
        .with_context(|| format!("Failed to update {}", version.as_str()))?;
    println!("Updated {}", version.as_str());
    Ok(())
}
