//! Asset fetching and object-store URL resolution

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{TourError, TourResult};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes of a downloaded asset with their content type
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedAsset {
    pub data: Bytes,
    pub content_type: String,
}

impl FetchedAsset {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }
}

/// Downloads binary assets (images, audio) by URL
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> TourResult<FetchedAsset>;
}

/// Asset fetcher over reqwest
pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

impl HttpAssetFetcher {
    pub fn new() -> TourResult<Self> {
        Self::with_timeout(Duration::from_secs(60))
    }

    pub fn with_timeout(timeout: Duration) -> TourResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TourError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> TourResult<FetchedAsset> {
        let asset_err = |reason: String| TourError::AssetFetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| asset_err(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(asset_err(format!("HTTP {}", response.status())));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let data = response
            .bytes()
            .await
            .map_err(|e| asset_err(format!("Failed to read body: {}", e)))?;

        Ok(FetchedAsset { data, content_type })
    }
}

/// Serves assets from memory; unknown URLs fail
#[derive(Default)]
pub struct MemoryAssetFetcher {
    assets: RwLock<HashMap<String, FetchedAsset>>,
    requests: RwLock<Vec<String>>,
}

impl MemoryAssetFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, asset: FetchedAsset) {
        self.assets.write().insert(url.to_string(), asset);
    }

    /// Every URL requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.read().clone()
    }
}

#[async_trait]
impl AssetFetcher for MemoryAssetFetcher {
    async fn fetch(&self, url: &str) -> TourResult<FetchedAsset> {
        self.requests.write().push(url.to_string());
        self.assets
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| TourError::AssetFetch {
                url: url.to_string(),
                reason: "not found".to_string(),
            })
    }
}

/// Resolves storage paths inside a bucket to public URLs
pub trait ObjectStore: Send + Sync {
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Public-bucket URLs of the form `{base}/storage/v1/object/public/{bucket}/{path}`
#[derive(Debug, Clone)]
pub struct PublicBucketStore {
    base_url: String,
}

impl PublicBucketStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl ObjectStore for PublicBucketStore {
    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            bucket.trim_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url_joins_segments() {
        let store = PublicBucketStore::new("https://api.example.com/");
        assert_eq!(
            store.public_url("media", "/org/audio.mp3"),
            "https://api.example.com/storage/v1/object/public/media/org/audio.mp3"
        );
    }

    #[tokio::test]
    async fn test_memory_fetcher() {
        let fetcher = MemoryAssetFetcher::new();
        fetcher.insert("https://x/a.jpg", FetchedAsset::new(vec![1u8, 2], "image/jpeg"));

        let asset = fetcher.fetch("https://x/a.jpg").await.unwrap();
        assert_eq!(asset.data.as_ref(), &[1, 2]);

        let missing = fetcher.fetch("https://x/b.jpg").await;
        assert!(matches!(missing, Err(TourError::AssetFetch { .. })));
        assert_eq!(fetcher.requests().len(), 2);
    }
}
