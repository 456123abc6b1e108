//! Shared pipeline context.
//!
//! Groups the configuration and the injected capabilities every stage needs,
//! so commands construct stages from one value instead of threading four
//! arguments through each call.

use std::fmt;
use std::sync::Arc;

use crate::acquire::Acquirer;
use crate::cache::MetadataCache;
use crate::config::Config;
use crate::fetch::Fetcher;
use crate::matrix::BuildMatrix;
use crate::process::ProcessRunner;
use crate::publish::Publisher;
use crate::reporter::Reporter;
use crate::verify::Harness;

#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub runner: Arc<dyn ProcessRunner>,
    pub fetcher: Arc<dyn Fetcher>,
    pub reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.config.root)
            .field("dry_run", &self.runner.is_dry_run())
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        config: Config,
        runner: Arc<dyn ProcessRunner>,
        fetcher: Arc<dyn Fetcher>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            runner,
            fetcher,
            reporter,
        }
    }

    pub fn cache(&self) -> MetadataCache {
        MetadataCache::new(&self.config, self.fetcher.clone())
    }

    pub fn acquirer(&self) -> Acquirer<'_> {
        Acquirer::new(&self.config, self.fetcher.clone(), self.reporter.as_ref())
    }

    pub fn build_matrix(&self) -> BuildMatrix<'_> {
        BuildMatrix::new(&self.config, self.runner.as_ref(), self.reporter.as_ref())
    }

    pub fn harness(&self) -> Harness<'_> {
        Harness::new(&self.config, self.runner.as_ref(), self.reporter.as_ref())
    }

    pub fn publisher(&self) -> Publisher<'_> {
        Publisher::new(&self.config, self.runner.as_ref(), self.reporter.as_ref())
    }
}
