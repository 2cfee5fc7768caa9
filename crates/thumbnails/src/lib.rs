//! Best-effort gcode preview fetching from Moonraker's file API.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shared::domain::ThumbnailKey;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Encoded image bytes as served by the printer (usually PNG).
pub type ThumbnailBytes = Arc<[u8]>;

#[async_trait]
pub trait ThumbnailSource: Send + Sync {
    /// `Ok(None)` means the file exists but carries no preview.
    async fn fetch(&self, key: &ThumbnailKey) -> Result<Option<Vec<u8>>>;
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    result: FileMetadata,
}

#[derive(Debug, Deserialize)]
struct FileMetadata {
    #[serde(default)]
    thumbnails: Vec<ThumbnailInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ThumbnailInfo {
    #[serde(default)]
    width: u64,
    #[serde(default)]
    height: u64,
    relative_path: Option<String>,
}

fn largest_thumbnail(thumbnails: &[ThumbnailInfo]) -> Option<&ThumbnailInfo> {
    thumbnails
        .iter()
        .filter(|t| t.relative_path.as_deref().is_some_and(|p| !p.is_empty()))
        .max_by_key(|t| t.width.saturating_mul(t.height))
}

/// Resolves a thumbnail path, which is relative to the gcode file's directory,
/// into path segments under the gcodes root.
fn thumbnail_segments(filename: &str, relative_path: &str) -> Vec<String> {
    let mut segments: Vec<&str> = filename.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop();
    for part in relative_path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            part => segments.push(part),
        }
    }
    segments.into_iter().map(str::to_string).collect()
}

/// Talks to `http://{address}/server/files/...`.
pub struct MoonrakerThumbnailSource {
    http: Client,
}

impl MoonrakerThumbnailSource {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build thumbnail http client")?;
        Ok(Self { http })
    }

    fn file_url(address: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&format!("http://{address}/"))
            .with_context(|| format!("invalid printer address '{address}'"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("printer address '{address}' cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ThumbnailSource for MoonrakerThumbnailSource {
    async fn fetch(&self, key: &ThumbnailKey) -> Result<Option<Vec<u8>>> {
        let metadata_url = Self::file_url(&key.address, &["server", "files", "metadata"])?;
        let metadata: MetadataResponse = self
            .http
            .get(metadata_url)
            .query(&[("filename", key.filename.as_str())])
            .send()
            .await
            .context("metadata request failed")?
            .error_for_status()?
            .json()
            .await
            .context("metadata response is not valid json")?;

        let Some(relative_path) = largest_thumbnail(&metadata.result.thumbnails)
            .and_then(|t| t.relative_path.as_deref())
        else {
            return Ok(None);
        };

        let mut segments = vec!["server", "files", "gcodes"];
        let resolved = thumbnail_segments(&key.filename, relative_path);
        segments.extend(resolved.iter().map(String::as_str));
        let image_url = Self::file_url(&key.address, &segments)?;
        let bytes = self
            .http
            .get(image_url)
            .send()
            .await
            .context("thumbnail download failed")?
            .error_for_status()?
            .bytes()
            .await
            .context("thumbnail body read failed")?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes.to_vec()))
    }
}

/// Caches successful fetches by key. Failures are logged and retried on the
/// next request for the same key.
pub struct ThumbnailLoader<S = MoonrakerThumbnailSource> {
    source: S,
    cache: Mutex<HashMap<ThumbnailKey, ThumbnailBytes>>,
}

impl ThumbnailLoader<MoonrakerThumbnailSource> {
    pub fn moonraker() -> Result<Self> {
        Ok(Self::new(MoonrakerThumbnailSource::new()?))
    }
}

impl<S: ThumbnailSource> ThumbnailLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn cached(&self, key: &ThumbnailKey) -> Option<ThumbnailBytes> {
        self.cache.lock().await.get(key).cloned()
    }

    pub async fn load(&self, key: &ThumbnailKey) -> Option<ThumbnailBytes> {
        if key.address.is_empty() || key.filename.is_empty() {
            return None;
        }
        if let Some(hit) = self.cached(key).await {
            return Some(hit);
        }

        match self.source.fetch(key).await {
            Ok(Some(bytes)) => {
                let bytes: ThumbnailBytes = bytes.into();
                debug!(
                    address = %key.address,
                    filename = %key.filename,
                    size = bytes.len(),
                    "thumbnail loaded"
                );
                self.cache
                    .lock()
                    .await
                    .insert(key.clone(), Arc::clone(&bytes));
                Some(bytes)
            }
            Ok(None) => {
                debug!(address = %key.address, filename = %key.filename, "file has no thumbnail");
                None
            }
            Err(err) => {
                warn!(
                    address = %key.address,
                    filename = %key.filename,
                    error = %format!("{err:#}"),
                    "thumbnail fetch failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
