//! HTTP fetch + atomic output writing for kaiqu.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone)]
pub struct WrittenOutput {
    pub file_name: String,
    pub path: PathBuf,
    pub byte_size: usize,
    pub sha256: String,
}

/// Writes whole payloads into one output directory. A target is either fully
/// replaced or left untouched.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Write through a temp file in the same directory, then rename over the target.
    pub async fn write_atomic(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<WrittenOutput> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating output directory {}", self.root.display()))?;

        let target = self.root.join(file_name);
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), file_name));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp output file {}", temp_path.display()))?;
        if let Err(err) = write_all_and_sync(&mut file, bytes).await {
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(err)
                .with_context(|| format!("writing temp output file {}", temp_path.display()));
        }
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &target).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp output {} -> {}",
                    temp_path.display(),
                    target.display()
                )
            });
        }

        Ok(WrittenOutput {
            file_name: file_name.to_string(),
            path: target,
            byte_size: bytes.len(),
            sha256: Self::sha256_hex(bytes),
        })
    }
}

async fn write_all_and_sync(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
        }
    }
}

/// Per-request knobs. The timeout overrides the client default.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions<'a> {
    pub timeout: Option<Duration>,
    /// Used when the response declares no charset.
    pub default_encoding: Option<&'a str>,
    pub headers: &'a [(&'a str, &'a str)],
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// One GET per call, no retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_text(
        &self,
        source_id: &str,
        url: &str,
        options: FetchOptions<'_>,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        async move {
            let mut request = self.client.get(url);
            if let Some(timeout) = options.timeout {
                request = request.timeout(timeout);
            }
            for (name, value) in options.headers {
                request = request.header(*name, *value);
            }

            let resp = request.send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let text = resp
                .text_with_charset(options.default_encoding.unwrap_or("utf-8"))
                .await?;
            debug!(status = status.as_u16(), chars = text.len(), "fetched");
            Ok(FetchedResponse {
                status,
                final_url,
                text,
            })
        }
        .instrument(span)
        .await
    }
}
