//! Install command

use std::path::Path;

use anyhow::{Context, Result};
use sdkenv::EnvVersion;

/// Install an environment. Ctrl-C cancels cooperatively: the pipeline
/// stops at the next checkpoint and partial state is rolled back.
pub async fn install(index_url: &str, version: &str, yes: bool) -> Result<()> {
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
    mgr.install(&version, &accept)
        .await
        .with_context(|| format!("Failed to install {}", version.as_str()))?;

    match mgr.environment(&version) {
        Some(env) if env.is_installed() => {
            println!("Installed {}", version.as_str());
        }
        _ => println!("Installation of {} did not complete", version.as_str()),
    }
    Ok(())
}
