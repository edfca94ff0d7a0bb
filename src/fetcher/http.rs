use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::DownloadSettings;
use crate::fetcher::target::DownloadTarget;
use crate::utils::error::{ConfigError, FetchError};

/// Retrieves one link into local storage.
///
/// The dispatcher only depends on this trait so fan-out behaviour can be
/// exercised without a network.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    /// Downloads `url` and returns the path of the written file.
    async fn fetch(&self, url: &str) -> Result<PathBuf, FetchError>;
}

/// HTTP(S) fetcher writing into a single download directory.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    client: Client,
    dir: PathBuf,
}

impl FileFetcher {
    pub fn new(settings: &DownloadSettings) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self::with_client(client, settings.dir.clone()))
    }

    pub fn with_client(client: Client, dir: PathBuf) -> Self {
        Self { client, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the download directory if it does not exist yet.
    pub async fn prepare(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    async fn download(&self, url: &str) -> Result<PathBuf, FetchError> {
        let target = DownloadTarget::resolve(&self.dir, url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        // the temp path deletes itself on drop, cancellation included
        let (file, temp) = target.temp_file()?.into_parts();
        write_body(url, response, File::from_std(file), &temp).await?;

        let path = target.path();
        temp.persist(&path).map_err(|e| FetchError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        debug!(path = %path.display(), "renamed into place");
        Ok(path)
    }
}

#[async_trait]
impl Fetch for FileFetcher {
    async fn fetch(&self, url: &str) -> Result<PathBuf, FetchError> {
        let path = self.download(url).await?;
        info!(url, path = %path.display(), "file downloaded successfully");
        Ok(path)
    }
}

/// Streams the body into `file` (located at `temp`), synced to disk before returning.
async fn write_body(
    url: &str,
    response: reqwest::Response,
    mut file: File,
    temp: &Path,
) -> Result<u64, FetchError> {
    let io_err = |source| FetchError::Io {
        path: temp.to_path_buf(),
        source,
    };

    let mut written = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    if written == 0 {
        warn!(url, "response body was empty");
    }
    Ok(written)
}
