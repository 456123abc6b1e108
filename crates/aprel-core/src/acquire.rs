//! Artifact acquisition.
//!
//! Downloads and unpacks every platform archive of a release into the shared
//! artifacts directory, plus the upstream source snapshot the test suite is
//! replayed from. Re-running is cheap: archives that exist are not
//! downloaded again, and archives that were unpacked carry an `.extracted`
//! marker so they are not unpacked again. The source snapshot is the
//! exception and is re-extracted on every run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aprel_schema::{ArchiveFormat, Platform, Release};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::archive::{self, ExtractError};
use crate::config::Config;
use crate::fetch::{FetchError, Fetcher};
use crate::reporter::Reporter;

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("Unsupported archive type for {url}")]
    UnsupportedArchive { url: String },

    #[error("Release {version} has no asset for platform {platform}")]
    MissingAsset { version: String, platform: Platform },

    #[error("Failed to download {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to unpack {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected source snapshot layout in {path}: {reason}")]
    SourceLayout { path: PathBuf, reason: String },
}

/// What one acquisition run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquireReport {
    /// Archives fetched from the network (source snapshot included).
    pub downloaded: Vec<PathBuf>,
    /// Archives unpacked (source snapshot included).
    pub extracted: Vec<PathBuf>,
    /// Platform archives that were already present and unpacked.
    pub skipped: Vec<PathBuf>,
    /// Unpacked source snapshot.
    pub source_dir: PathBuf,
}

pub struct Acquirer<'a> {
    config: &'a Config,
    fetcher: Arc<dyn Fetcher>,
    reporter: &'a dyn Reporter,
}

fn marker_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(".extracted");
    PathBuf::from(name)
}

impl<'a> Acquirer<'a> {
    pub fn new(config: &'a Config, fetcher: Arc<dyn Fetcher>, reporter: &'a dyn Reporter) -> Self {
        Self {
            config,
            fetcher,
            reporter,
        }
    }

    pub async fn acquire(&self, release: &Release) -> Result<AcquireReport, AcquireError> {
        tokio::fs::create_dir_all(&self.config.artifacts_dir).await?;
        let mut report = AcquireReport::default();

        for platform in &release.platforms {
            let url = release
                .asset_urls
                .get(platform)
                .ok_or_else(|| AcquireError::MissingAsset {
                    version: release.version.clone(),
                    platform: platform.clone(),
                })?;
            let format = ArchiveFormat::from_name(url)
                .ok_or_else(|| AcquireError::UnsupportedArchive { url: url.clone() })?;
            let archive = self.config.archive_path(&release.version, platform, format);
            let marker = marker_path(&archive);

            let present = archive.exists();
            if present && marker.exists() {
                debug!("{} already unpacked", archive.display());
                report.skipped.push(archive);
                continue;
            }

            if !present {
                self.reporter
                    .step(&format!("Download {} for {platform}", release.version));
                self.download(url, &archive).await?;
                report.downloaded.push(archive.clone());
            }

            self.unpack(&archive, &self.config.artifacts_dir).await?;
            tokio::fs::write(&marker, b"").await?;
            report.extracted.push(archive);
        }

        report.source_dir = self.acquire_source(release, &mut report).await?;
        info!(
            "Acquired {}: {} downloaded, {} extracted, {} skipped",
            release.version,
            report.downloaded.len(),
            report.extracted.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Download (if missing) and re-extract the source snapshot, leaving it
    /// at [`Config::source_dir`] with an empty `build` directory inside.
    async fn acquire_source(
        &self,
        release: &Release,
        report: &mut AcquireReport,
    ) -> Result<PathBuf, AcquireError> {
        let archive = self.config.source_archive_path(&release.version);
        let dest = self.config.source_dir(&release.version);

        if !archive.exists() {
            self.reporter
                .step(&format!("Download source of {}", release.version));
            self.download(&release.source_archive_url, &archive).await?;
            report.downloaded.push(archive.clone());
        }

        let scratch = tempfile::Builder::new()
            .prefix(".source-")
            .tempdir_in(&self.config.artifacts_dir)?;
        self.unpack(&archive, scratch.path()).await?;
        report.extracted.push(archive);

        let top_level = single_top_level_dir(scratch.path())?;
        match tokio::fs::remove_dir_all(&dest).await {
            Ok(()) => debug!("Removed previous extraction {}", dest.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::rename(&top_level, &dest).await?;
        tokio::fs::create_dir_all(dest.join("build")).await?;
        Ok(dest)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), AcquireError> {
        let bytes = self
            .fetcher
            .download(url, dest)
            .await
            .map_err(|source| AcquireError::Fetch {
                url: url.to_string(),
                source,
            })?;
        debug!("Downloaded {url} ({bytes} bytes)");
        Ok(())
    }

    async fn unpack(&self, archive: &Path, dest: &Path) -> Result<(), AcquireError> {
        let archive_owned = archive.to_path_buf();
        let dest = dest.to_path_buf();
        let files = tokio::task::spawn_blocking(move || archive::extract(&archive_owned, &dest))
            .await
            .map_err(std::io::Error::other)?
            .map_err(|source| AcquireError::Extract {
                path: archive.to_path_buf(),
                source,
            })?;
        debug!("Unpacked {} ({} files)", archive.display(), files.len());
        for file in &files {
            trace!("  {}", file.display());
        }
        Ok(())
    }
}

fn single_top_level_dir(dir: &Path) -> Result<PathBuf, AcquireError> {
    let entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .collect();

    match entries.as_slice() {
        [entry] if entry.file_type()?.is_dir() => Ok(entry.path()),
        _ => Err(AcquireError::SourceLayout {
            path: dir.to_path_buf(),
            reason: format!("expected one top-level directory, found {} entries", entries.len()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testing::{tar_gz, zip};
    use crate::fetch::testing::StaticFetcher;
    use crate::reporter::NullReporter;
    use std::collections::BTreeMap;

    fn release() -> Release {
        let linux = Platform::new("linux-x64").unwrap();
        let macos = Platform::new("macos").unwrap();
        Release {
            version: "2.9".to_string(),
            name: "Async-profiler 2.9".to_string(),
            platforms: vec![linux.clone(), macos.clone()],
            asset_urls: BTreeMap::from([
                (linux, "https://dl/ap-2.9-linux-x64.tar.gz".to_string()),
                (macos, "https://dl/ap-2.9-macos.zip".to_string()),
            ]),
            source_archive_url: "https://dl/v2.9.zip".to_string(),
            changelog_body: String::new(),
            html_url: String::new(),
            is_prerelease: false,
            is_most_recent: true,
        }
    }

    fn fetcher() -> Arc<StaticFetcher> {
        Arc::new(
            StaticFetcher::new()
                .with(
                    "https://dl/ap-2.9-linux-x64.tar.gz",
                    tar_gz(&[("async-profiler-2.9-linux-x64/build/libasyncProfiler.so", b"elf")]),
                )
                .with(
                    "https://dl/ap-2.9-macos.zip",
                    zip(&[("async-profiler-2.9-macos/build/libasyncProfiler.so", b"macho")]),
                )
                .with(
                    "https://dl/v2.9.zip",
                    zip(&[
                        ("async-profiler-2.9/test/ThreadsTarget.java", b"class ThreadsTarget {}"),
                        ("async-profiler-2.9/test/alloc.sh", b"../profiler.sh start"),
                    ]),
                ),
        )
    }

    #[tokio::test]
    async fn test_acquire_unpacks_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let fetcher = fetcher();
        let acquirer = Acquirer::new(&config, fetcher.clone(), &NullReporter);

        let report = acquirer.acquire(&release()).await.unwrap();

        assert_eq!(report.downloaded.len(), 3);
        assert_eq!(report.extracted.len(), 3);
        assert!(
            config
                .artifacts_dir
                .join("async-profiler-2.9-linux-x64/build/libasyncProfiler.so")
                .exists()
        );
        assert!(
            config
                .archive_path("2.9", &Platform::new("macos").unwrap(), ArchiveFormat::Zip)
                .exists()
        );
        assert_eq!(report.source_dir, config.source_dir("2.9"));
        assert!(report.source_dir.join("test/alloc.sh").exists());
        assert!(report.source_dir.join("build").is_dir());
    }

    #[tokio::test]
    async fn test_rerun_downloads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let fetcher = fetcher();
        let acquirer = Acquirer::new(&config, fetcher.clone(), &NullReporter);

        acquirer.acquire(&release()).await.unwrap();
        let first_requests = fetcher.requests().len();
        std::fs::write(config.source_dir("2.9").join("stale"), b"x").unwrap();

        let report = acquirer.acquire(&release()).await.unwrap();

        assert_eq!(fetcher.requests().len(), first_requests);
        assert!(report.downloaded.is_empty());
        assert_eq!(report.skipped.len(), 2);
        // only the source snapshot is unpacked again, replacing the old tree
        assert_eq!(report.extracted, [config.source_archive_path("2.9")]);
        assert!(!config.source_dir("2.9").join("stale").exists());
    }

    #[tokio::test]
    async fn test_unsupported_archive_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let mut release = release();
        let linux = Platform::new("linux-x64").unwrap();
        release
            .asset_urls
            .insert(linux, "https://dl/ap-2.9-linux-x64.tar.xz".to_string());

        let acquirer = Acquirer::new(&config, fetcher(), &NullReporter);
        let err = acquirer.acquire(&release).await.unwrap_err();
        assert!(matches!(err, AcquireError::UnsupportedArchive { .. }));
    }

    #[tokio::test]
    async fn test_download_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let acquirer = Acquirer::new(&config, Arc::new(StaticFetcher::new()), &NullReporter);

        let err = acquirer.acquire(&release()).await.unwrap_err();
        assert!(matches!(err, AcquireError::Fetch { .. }));
    }
}
