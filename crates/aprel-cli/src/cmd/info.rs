//! Version listing commands

use anyhow::{Context, Result};

use super::Session;

/// Print the most recent supported upstream version
pub async fn current_version(session: &Session) -> Result<()> {
    let version = session
        .resolver()
        .most_recent()
        .await
        .context("Failed to determine the current version")?;
    println!("{version}");
    Ok(())
}

/// Print every supported upstream version, newest first
pub async fn versions(session: &Session) -> Result<()> {
    let versions = session
        .resolver()
        .supported_versions()
        .await
        .context("Failed to list versions")?;
    println!("{}", versions.join(" "));
    Ok(())
}
