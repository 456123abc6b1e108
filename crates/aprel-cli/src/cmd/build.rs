//! Build command

use anyhow::{Context, Result};
use aprel_core::matrix::BuildMatrixResult;

use super::Session;

/// Download the target release, then build every loader of it
pub async fn build(session: &mut Session) -> Result<BuildMatrixResult> {
    super::download::download(session).await?;
    let release = session.release().await?;
    session
        .ctx
        .reporter
        .section(&format!("Build release {}", release.version));

    let result = session
        .ctx
        .build_matrix()
        .build(&release)
        .with_context(|| format!("Failed to build release {}", release.version))?;
    Ok(result)
}
