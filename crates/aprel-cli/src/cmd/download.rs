//! Download command

use anyhow::{Context, Result};
use aprel_core::acquire::AcquireReport;

use super::Session;

/// Download and unpack every archive of the target release
pub async fn download(session: &mut Session) -> Result<AcquireReport> {
    let release = session.release().await?;
    let reporter = &session.ctx.reporter;
    reporter.section(&format!("Download release {}", release.version));

    let report = session
        .ctx
        .acquirer()
        .acquire(&release)
        .await
        .with_context(|| format!("Failed to download release {}", release.version))?;

    if report.downloaded.is_empty() {
        reporter.info("All archives already present");
    }
    reporter.success(&format!(
        "Release {} ready ({} downloaded, {} unpacked)",
        release.version,
        report.downloaded.len(),
        report.extracted.len()
    ));
    Ok(report)
}
