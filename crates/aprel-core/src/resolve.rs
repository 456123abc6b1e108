//! Release resolution.
//!
//! Turns a version selector into a [`Release`] using the upstream release
//! list, which is read through the [`MetadataCache`]. The upstream list is
//! ordered newest first and is never re-sorted.

use std::collections::BTreeMap;

use aprel_schema::{Platform, Release};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheError, MetadataCache, cache_key_for_url};
use crate::config::UpstreamConfig;
use crate::filename_from_url;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Release {requested} not found, available releases are: {}", .available.join(", "))]
    UnknownVersion {
        requested: String,
        available: Vec<String>,
    },

    #[error("No release with version prefix {prefix} found")]
    NoSupportedRelease { prefix: String },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// One entry of the GitHub releases API response.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub assets: Vec<GithubAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl GithubRelease {
    /// Version without the leading `v`.
    pub fn version(&self) -> &str {
        self.tag_name.strip_prefix('v').unwrap_or(&self.tag_name)
    }
}

/// Which release to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    /// The most recent release of the supported major version.
    Latest,
    /// A specific upstream version, without the `v` prefix.
    Exact(String),
}

impl VersionSelector {
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            Some(v) => Self::Exact(v.trim_start_matches('v').to_string()),
            None => Self::Latest,
        }
    }
}

/// Versions offered to the operator: legacy majors and tags not ending in a
/// digit (release candidates, odd tags) are dropped.
pub fn release_versions(releases: &[GithubRelease], upstream: &UpstreamConfig) -> Vec<String> {
    releases
        .iter()
        .map(GithubRelease::version)
        .filter(|v| !v.starts_with(&upstream.legacy_major))
        .filter(|v| v.ends_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

/// First offered version with the supported major prefix.
pub fn most_recent_version(releases: &[GithubRelease], upstream: &UpstreamConfig) -> Option<String> {
    release_versions(releases, upstream)
        .into_iter()
        .find(|v| v.starts_with(&upstream.supported_major))
}

/// Build a [`Release`] from its API entry.
pub fn build_release(raw: &GithubRelease, source_archive_url: String, is_most_recent: bool) -> Release {
    let mut platforms = Vec::new();
    let mut asset_urls = BTreeMap::new();

    for asset in &raw.assets {
        let file_name = filename_from_url(&asset.browser_download_url);
        let file_name = if file_name.is_empty() { asset.name.as_str() } else { file_name };
        let Some(platform) = Platform::from_asset_name(file_name) else {
            debug!("Skipping non-platform asset {}", asset.name);
            continue;
        };
        if asset_urls.contains_key(&platform) {
            warn!(
                "Duplicate asset for platform {platform} in {}: {}",
                raw.tag_name, asset.name
            );
            continue;
        }
        asset_urls.insert(platform.clone(), asset.browser_download_url.clone());
        platforms.push(platform);
    }

    Release {
        version: raw.version().to_string(),
        name: raw.name.clone().unwrap_or_else(|| raw.tag_name.clone()),
        platforms,
        asset_urls,
        source_archive_url,
        changelog_body: raw.body.clone().unwrap_or_default(),
        html_url: raw.html_url.clone(),
        is_prerelease: raw.prerelease,
        is_most_recent,
    }
}

pub struct Resolver<'a> {
    cache: &'a MetadataCache,
    upstream: &'a UpstreamConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(cache: &'a MetadataCache, upstream: &'a UpstreamConfig) -> Self {
        Self { cache, upstream }
    }

    /// The raw upstream release list, newest first.
    pub async fn releases(&self) -> Result<Vec<GithubRelease>, ResolveError> {
        let url = &self.upstream.releases_url;
        Ok(self.cache.fetch_json(url, &cache_key_for_url(url)).await?)
    }

    /// Every offered version, including other majors than the supported one.
    pub async fn versions(&self) -> Result<Vec<String>, ResolveError> {
        Ok(release_versions(&self.releases().await?, self.upstream))
    }

    /// Offered versions of the supported major.
    pub async fn supported_versions(&self) -> Result<Vec<String>, ResolveError> {
        Ok(self
            .versions()
            .await?
            .into_iter()
            .filter(|v| v.starts_with(&self.upstream.supported_major))
            .collect())
    }

    pub async fn most_recent(&self) -> Result<String, ResolveError> {
        most_recent_version(&self.releases().await?, self.upstream).ok_or_else(|| {
            ResolveError::NoSupportedRelease {
                prefix: self.upstream.supported_major.clone(),
            }
        })
    }

    pub async fn resolve(&self, selector: &VersionSelector) -> Result<Release, ResolveError> {
        let releases = self.releases().await?;
        let versions = release_versions(&releases, self.upstream);
        let latest = most_recent_version(&releases, self.upstream);

        let version = match selector {
            VersionSelector::Exact(v) => v.clone(),
            VersionSelector::Latest => latest.clone().ok_or_else(|| ResolveError::NoSupportedRelease {
                prefix: self.upstream.supported_major.clone(),
            })?,
        };

        let raw = versions
            .iter()
            .any(|v| *v == version)
            .then(|| releases.iter().find(|r| r.version() == version))
            .flatten()
            .ok_or_else(|| ResolveError::UnknownVersion {
                requested: version.clone(),
                available: versions.clone(),
            })?;

        let release = build_release(
            raw,
            self.upstream.source_archive_url.replace("{version}", &version),
            latest.as_deref() == Some(version.as_str()),
        );
        debug!(
            "Resolved {} with platforms [{}]",
            release.tag(),
            release
                .platforms
                .iter()
                .map(Platform::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(release)
    }
}
