//! Artifact downloads.
//!
//! Grids and upscales are served from a CDN; the fetcher downloads bytes
//! with bounded retries and verifies that what came back is an image. No
//! transformation happens here.

use crate::error::HttpError;
use crate::ratelimit::backoff_delay;
use reqwest::Client;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Retry budget for one download.
const MAX_FETCH_RETRIES: u32 = 3;

/// Per-attempt deadline.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// A downloaded artifact.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// MIME type reported by the CDN; always begins with `image/`.
    pub content_type: String,
}

/// Downloads artifact bytes from CDN URLs.
pub struct ImageFetcher {
    client: Client,
}

impl ImageFetcher {
    /// Create a new fetcher.
    pub fn new() -> Result<Self, HttpError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    /// Download `url`, retrying transient failures with exponential
    /// backoff. Fails when the response is not an image.
    pub async fn fetch(&self, url: &str) -> Result<FetchedImage, HttpError> {
        let mut attempt = 0u32;

        loop {
            match timeout(ATTEMPT_TIMEOUT, self.fetch_once(url)).await {
                Ok(Ok(image)) => {
                    debug!(url, size = image.bytes.len(), "Artifact downloaded");
                    return Ok(image);
                }
                Ok(Err(err @ HttpError::NotAnImage(_))) => return Err(err),
                Ok(Err(err)) if attempt >= MAX_FETCH_RETRIES => return Err(err),
                Err(_) if attempt >= MAX_FETCH_RETRIES => return Err(HttpError::DeadlineElapsed),
                Ok(Err(err)) => {
                    warn!(url, attempt, error = %err, "Download failed, retrying");
                }
                Err(_) => {
                    warn!(url, attempt, "Download timed out, retrying");
                }
            }

            tokio::time::sleep(backoff_delay(attempt)).await;
            attempt += 1;
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedImage, HttpError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(HttpError::ServerError(status.as_u16()));
        }
        if !status.is_success() {
            return Err(HttpError::UnexpectedStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match content_type {
            Some(mime) if mime.starts_with("image/") => {
                let bytes = response.bytes().await?.to_vec();
                Ok(FetchedImage {
                    bytes,
                    content_type: mime,
                })
            }
            other => Err(HttpError::NotAnImage(other)),
        }
    }
}
