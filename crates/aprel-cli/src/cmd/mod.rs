//! Command dispatch.
//!
//! A [`Session`] carries the shared [`Context`] across all commands of one
//! invocation and resolves the target release at most once, on first use.

pub mod build;
pub mod clear;
pub mod deploy;
pub mod download;
pub mod info;
pub mod test;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use aprel_core::cache::MetadataCache;
use aprel_core::resolve::{Resolver, VersionSelector};
use aprel_core::{Config, Context, HttpFetcher, SystemRunner};
use aprel_schema::Release;

use crate::ui::ConsoleReporter;
use crate::{Cli, Invocation, Step, runtime_selectors};

pub struct Session {
    pub ctx: Context,
    pub cache: MetadataCache,
    pub runtimes: Vec<String>,
    pub skip_verify: bool,
    selector: VersionSelector,
    release: Option<Release>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("ctx", &self.ctx)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(ctx: Context, version: Option<&str>, runtimes: Vec<String>, skip_verify: bool) -> Self {
        let cache = ctx.cache();
        Self {
            ctx,
            cache,
            runtimes,
            skip_verify,
            selector: VersionSelector::from_arg(version),
            release: None,
        }
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.cache, &self.ctx.config.upstream)
    }

    /// The target release, resolved on first call.
    pub async fn release(&mut self) -> Result<Release> {
        if let Some(release) = &self.release {
            return Ok(release.clone());
        }
        let release = self
            .resolver()
            .resolve(&self.selector)
            .await
            .context("Failed to resolve release")?;
        tracing::info!("Target release {}", release.version);
        self.release = Some(release.clone());
        Ok(release)
    }

    pub async fn run_step(&mut self, step: Step) -> Result<()> {
        if step.needs_release() {
            self.release().await?;
        }
        match step {
            Step::CurrentVersion => info::current_version(self).await,
            Step::Versions => info::versions(self).await,
            Step::Download => download::download(self).await.map(|_| ()),
            Step::Build => build::build(self).await.map(|_| ()),
            Step::Test => test::test(self).await,
            Step::DeployMvn => deploy::deploy_registry(self).await,
            Step::DeployGh => deploy::deploy_code_host(self).await,
            Step::Deploy => deploy::deploy(self, true).await,
            Step::DeployRelease => deploy::deploy(self, false).await,
            Step::Clear => clear::clear(self),
        }
    }
}

/// Build the context from the command line and run every step in order.
pub async fn run(cli: &Cli, invocation: Invocation) -> Result<()> {
    let root = std::path::absolute(&cli.root)
        .with_context(|| format!("Invalid root {}", cli.root.display()))?;
    let config = Config::load(&root).context("Failed to load configuration")?;
    let fetcher = HttpFetcher::new().context("Failed to create HTTP client")?;
    let ctx = Context::new(
        config,
        Arc::new(SystemRunner::new(cli.dry_run)),
        Arc::new(fetcher),
        Arc::new(ConsoleReporter::new()),
    );

    let mut session = Session::new(
        ctx,
        invocation.version.as_deref(),
        runtime_selectors(&cli.runtimes),
        cli.skip_verify,
    );
    for step in invocation.steps {
        tracing::debug!("Running {step:?}");
        session.run_step(step).await?;
    }
    Ok(())
}
