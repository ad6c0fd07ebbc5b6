//! Thumbnail fetching over HTTP.

use crate::error::ApiError;
use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tracing::debug;

/// Static URL of a rendered thumbnail
pub fn thumbnail_url(base_url: &str, slug: &str, hash: &str) -> String {
    format!(
        "{}/static/env/{}/thumbs/{}.jpg",
        base_url.trim_end_matches('/'),
        slug,
        hash
    )
}

#[derive(Clone)]
pub struct ThumbnailFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl ThumbnailFetcher {
    /// `base_url` is the authority's HTTP root, e.g. `http://127.0.0.1:10548`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn url(&self, slug: &str, hash: &str) -> String {
        thumbnail_url(&self.base_url, slug, hash)
    }

    /// Start fetching a thumbnail in the background.
    pub fn fetch(&self, slug: &str, hash: &str) -> FetchHandle {
        let http = self.http.clone();
        let url = self.url(slug, hash);
        FetchHandle {
            task: tokio::spawn(async move { fetch_bytes(&http, &url).await }),
        }
    }
}

async fn fetch_bytes(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, ApiError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| ApiError::Transport(format!("GET {} failed: {}", url, e)))?;
    match response.status() {
        StatusCode::OK => {}
        StatusCode::NOT_FOUND => return Err(ApiError::PathNotFound(url.to_string())),
        status => {
            return Err(ApiError::Transport(format!(
                "GET {} returned {}",
                url, status
            )))
        }
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Transport(format!("Reading {} failed: {}", url, e)))?;
    debug!(url, size = bytes.len(), "Fetched thumbnail");
    Ok(bytes.to_vec())
}

/// An in-flight fetch. Dropping or cancelling it aborts the request.
pub struct FetchHandle {
    task: JoinHandle<Result<Vec<u8>, ApiError>>,
}

impl FetchHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn bytes(mut self) -> Result<Vec<u8>, ApiError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                Err(ApiError::Transport("Thumbnail fetch cancelled".to_string()))
            }
            Err(e) => Err(ApiError::Transport(format!("Thumbnail fetch failed: {}", e))),
        }
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
