//! Network access.
//!
//! [`Fetcher`] is the only way the pipeline talks to the network, so the
//! cache and acquirer can be tested against in-memory fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the whole body.
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, FetchError>;

    /// GET `url` and stream the body to `dest`. The file only appears at
    /// `dest` once the transfer completed. Returns the number of bytes
    /// written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder().user_agent(crate::USER_AGENT).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// `<dest>.part`, where a download is written before it is complete.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, FetchError> {
        tracing::debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        tracing::debug!("Download {url} -> {}", dest.display());
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?
            .error_for_status()?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = partial_path(dest);
        let written = match write_part(response, &part).await {
            Ok(written) => tokio::fs::rename(&part, dest)
                .await
                .map(|()| written)
                .map_err(FetchError::from),
            Err(e) => Err(e),
        };
        if written.is_err() {
            tokio::fs::remove_file(&part).await.ok();
        }
        written
    }
}

/// Stream the body of `response` into `part`.
async fn write_part(response: reqwest::Response, part: &Path) -> Result<u64, FetchError> {
    let mut file = File::create(part).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(downloaded)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory fetcher serving fixed bodies and counting requests.

    use super::{FetchError, Fetcher};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct StaticFetcher {
        bodies: HashMap<String, Bytes>,
        requests: Mutex<Vec<String>>,
    }

    impl StaticFetcher {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with(mut self, url: &str, body: impl Into<Bytes>) -> Self {
            self.bodies.insert(url.to_string(), body.into());
            self
        }

        pub(crate) fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        fn body(&self, url: &str) -> Result<Bytes, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.bodies.get(url).cloned().ok_or_else(|| {
                FetchError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no body for {url}"),
                ))
            })
        }
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch_bytes(&self, url: &str) -> Result<Bytes, FetchError> {
            self.body(url)
        }

        async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
            let body = self.body(url)?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(dest, &body)?;
            Ok(body.len() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_fetch_bytes_sends_user_agent() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/releases")
            .match_header("user-agent", crate::USER_AGENT)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let body = fetcher
            .fetch_bytes(&format!("{}/releases", server.url()))
            .await
            .unwrap();
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn test_fetch_bytes_rejects_error_status() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/releases")
            .with_status(403)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher
            .fetch_bytes(&format!("{}/releases", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Http(_)));
    }

    #[tokio::test]
    async fn test_download_writes_complete_file() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/ap.tar.gz")
            .with_status(200)
            .with_body(vec![7u8; 4096])
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/ap.tar.gz");
        let fetcher = HttpFetcher::new().unwrap();
        let written = fetcher
            .download(&format!("{}/ap.tar.gz", server.url()), &dest)
            .await
            .unwrap();

        assert_eq!(written, 4096);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_download_failure_leaves_no_file() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/missing.zip")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.zip");
        let fetcher = HttpFetcher::new().unwrap();
        assert!(
            fetcher
                .download(&format!("{}/missing.zip", server.url()), &dest)
                .await
                .is_err()
        );
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_failed_rename_removes_part_file() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/ap.zip")
            .with_status(200)
            .with_body("zip")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        // a non-empty directory in the way makes the final rename fail
        let dest = dir.path().join("ap.zip");
        std::fs::create_dir_all(dest.join("occupied")).unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher
            .download(&format!("{}/ap.zip", server.url()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Io(_)));
        assert!(!partial_path(&dest).exists());
        assert!(dest.is_dir());
    }
}
