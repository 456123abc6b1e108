//! Test command

use anyhow::{Context, Result};
use aprel_core::matrix::BuildMatrixResult;

use super::Session;

/// Verify the built loaders of the target release and persist the report,
/// passing or not
pub async fn test(session: &mut Session) -> Result<()> {
    let release = session.release().await?;
    let ctx = &session.ctx;
    ctx.reporter
        .section(&format!("Test release {}", release.version));

    if ctx.runner.is_dry_run() {
        ctx.reporter.info("[dry-run] skipping verification");
        return Ok(());
    }

    let build = BuildMatrixResult::from_disk(&ctx.config, &release)?;
    ctx.harness()
        .verify_and_record(&build, &session.runtimes)
        .with_context(|| format!("Tests for release {} failed", release.version))?;

    ctx.reporter
        .success(&format!("Release {} verified", release.version));
    Ok(())
}
