//! Clear command

use anyhow::{Context, Result};

use super::Session;

/// Remove downloaded releases, build output and test directories
pub fn clear(session: &Session) -> Result<()> {
    let config = &session.ctx.config;
    let removed = aprel_core::clean::clear(config).context("Failed to clear")?;
    for dir in &removed {
        session
            .ctx
            .reporter
            .info(&format!("Removed {}", dir.display()));
    }
    session.ctx.reporter.success("Clean slate");
    Ok(())
}
