//! Time-bounded cache of remote release metadata.
//!
//! One file per key under the cache directory. An entry is fresh while its
//! modification time plus the TTL lies in the future. Refreshes are written
//! to a temporary file in the same directory and renamed over the entry, so
//! a failed refresh leaves the previous entry intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::fetch::{FetchError, Fetcher};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Invalid JSON in cache entry {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Stable file name for a URL: its path segments joined with `_`.
///
/// `https://api.github.com/repos/a/b/releases` -> `repos_a_b_releases.json`
pub fn cache_key_for_url(url: &str) -> String {
    let path = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest)
        .split_once('/')
        .map_or("", |(_, path)| path);
    let key: String = path
        .split(['/', '?', '&', '='])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if key.is_empty() {
        "index.json".to_string()
    } else {
        format!("{key}.json")
    }
}

pub struct MetadataCache {
    dir: PathBuf,
    ttl: Duration,
    serve_stale_on_error: bool,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("dir", &self.dir)
            .field("ttl", &self.ttl)
            .field("serve_stale_on_error", &self.serve_stale_on_error)
            .finish_non_exhaustive()
    }
}

impl MetadataCache {
    pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            dir: config.cache_dir.clone(),
            ttl: config.cache_ttl,
            serve_stale_on_error: config.serve_stale_on_error,
            fetcher,
        }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Cached JSON for `key`, refreshed from `url` when missing or stale.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str, key: &str) -> Result<T, CacheError> {
        let raw = self.fetch_raw(url, key).await?;
        serde_json::from_slice(&raw).map_err(|source| CacheError::Json {
            key: key.to_string(),
            source,
        })
    }

    /// Cached bytes for `key`, refreshed from `url` when missing or stale.
    /// Refreshed payloads must parse as JSON before they replace the entry.
    pub async fn fetch_raw(&self, url: &str, key: &str) -> Result<Bytes, CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(key);

        let modified = match tokio::fs::metadata(&path).await {
            Ok(meta) => Some(meta.modified()?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(modified) = modified {
            if is_fresh(modified, self.ttl, SystemTime::now()) {
                debug!(
                    "Cache hit for {key} (fetched {})",
                    DateTime::<Local>::from(modified).format("%Y-%m-%d %H:%M:%S")
                );
                return Ok(Bytes::from(tokio::fs::read(&path).await?));
            }
            debug!("Cache entry {key} is stale, refreshing");
        } else {
            debug!("Cache miss for {key}");
        }

        match self.refresh(url, key, &path).await {
            Ok(body) => Ok(body),
            Err(CacheError::Fetch { url, source }) if modified.is_some() && self.serve_stale_on_error => {
                warn!("Refreshing {key} from {url} failed ({source}), serving stale entry");
                Ok(Bytes::from(tokio::fs::read(&path).await?))
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh(&self, url: &str, key: &str, path: &Path) -> Result<Bytes, CacheError> {
        let body = self
            .fetcher
            .fetch_bytes(url)
            .await
            .map_err(|source| CacheError::Fetch {
                url: url.to_string(),
                source,
            })?;

        serde_json::from_slice::<serde::de::IgnoredAny>(&body).map_err(|source| CacheError::Json {
            key: key.to_string(),
            source,
        })?;

        let dir = self.dir.clone();
        let dest = path.to_path_buf();
        let payload = body.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            std::io::Write::write_all(&mut tmp, &payload)?;
            tmp.persist(&dest).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;

        debug!("Cached {url} as {key} ({} bytes)", body.len());
        Ok(body)
    }
}

fn is_fresh(fetched_at: SystemTime, ttl: Duration, now: SystemTime) -> bool {
    fetched_at
        .checked_add(ttl)
        .is_some_and(|expires| expires > now)
}
