// HTTP fetcher - streams a media URL to disk with byte-level progress

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::NetworkConfig;
use crate::downloader::errors::DownloadError;
use crate::downloader::traits::MediaFetcher;

pub struct HttpFetcher {
    client: reqwest::Client,
    chunk_size: usize,
}

impl HttpFetcher {
    pub fn new(config: &NetworkConfig) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        if let Some(proxy_url) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| DownloadError::Config(format!("Invalid proxy URL {}: {}", proxy_url, e)))?;
            tracing::info!("[http] using proxy {}", proxy_url);
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| DownloadError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size.max(1),
        })
    }

    pub fn with_client(client: reqwest::Client, chunk_size: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        on_progress: &mut (dyn FnMut(u64, u64) + Send),
    ) -> Result<(), DownloadError> {
        let fail = |cause: String| DownloadError::Fetch {
            url: url.to_string(),
            cause,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status)));
        }

        let total = response.content_length().unwrap_or(0);
        tracing::debug!("[http] GET {} -> {} ({} bytes)", url, status, total);

        let mut file = File::create(destination).await?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = response.chunk().await.map_err(|e| fail(e.to_string()))? {
            for slice in chunk.chunks(self.chunk_size) {
                file.write_all(slice).await?;
                downloaded += slice.len() as u64;
                on_progress(downloaded, total);
            }
        }
        file.flush().await?;

        if total > 0 && downloaded != total {
            return Err(fail(format!(
                "connection closed after {} of {} bytes",
                downloaded, total
            )));
        }

        tracing::debug!("[http] saved {} bytes to {}", downloaded, destination.display());
        Ok(())
    }
}
