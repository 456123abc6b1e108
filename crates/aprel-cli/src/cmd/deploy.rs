//! Deploy commands

use anyhow::{Context, Result, bail};
use aprel_core::matrix::{BuildError, BuildMatrixResult};
use aprel_core::publish::{PublishedVia, VerifiedBuild};
use aprel_core::verify;
use aprel_schema::{Channel, Release};

use super::Session;

/// The build of `release` together with its proof of verification. Builds
/// first when no artifacts exist yet.
async fn verified_build(session: &mut Session, release: &Release) -> Result<VerifiedBuild> {
    let build = match BuildMatrixResult::from_disk(&session.ctx.config, release) {
        Ok(build) => build,
        Err(BuildError::MissingArtifact { path }) => {
            tracing::info!("{} is missing, building first", path.display());
            super::build::build(session).await?
        }
        Err(e) => return Err(e.into()),
    };

    let ctx = &session.ctx;
    if session.skip_verify {
        return Ok(VerifiedBuild::waived(build));
    }
    match verify::load_report(&ctx.config, &build.version)? {
        Some(report) => Ok(VerifiedBuild::new(build, &report)?),
        None if ctx.runner.is_dry_run() => Ok(VerifiedBuild::waived(build)),
        None => bail!(
            "No verification report for {}-{}, run `test` first or pass --skip-verify",
            build.version,
            build.subversion
        ),
    }
}

async fn publish(session: &mut Session, channels: &[Channel], snapshot: bool) -> Result<()> {
    let release = session.release().await?;
    let verified = verified_build(session, &release).await?;
    let ctx = &session.ctx;

    let summary = ctx
        .publisher()
        .publish(&release, &verified, channels, snapshot)
        .with_context(|| format!("Failed to deploy release {}", release.version))?;

    if !summary.registry.is_empty() {
        ctx.reporter.success(&format!(
            "Deployed {} artifacts of {} to the registry",
            summary.registry.len(),
            release.version
        ));
    }
    match summary.code_host {
        Some(PublishedVia::Created) => ctx.reporter.success("Created code-host release"),
        Some(PublishedVia::Edited) => ctx.reporter.success("Updated existing code-host release"),
        None => {}
    }
    Ok(())
}

/// Deploy the loaders as a snapshot to the package registry
pub async fn deploy_registry(session: &mut Session) -> Result<()> {
    publish(session, &[Channel::Registry], true).await
}

/// Deploy the loaders to the code host
pub async fn deploy_code_host(session: &mut Session) -> Result<()> {
    publish(session, &[Channel::CodeHost], true).await
}

/// Deploy to both channels, as a snapshot or as a final release
pub async fn deploy(session: &mut Session, snapshot: bool) -> Result<()> {
    publish(session, &[Channel::Registry, Channel::CodeHost], snapshot).await
}
