//! Product image lookup for bargain messages.

use async_trait::async_trait;
use common::{CatalogClient, ImageCache};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Resolves the image shown with a bargain.
/// Mockable for testing via mockall.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageLookup: Send + Sync {
    /// First usable image URL of a SKU, if any.
    async fn first_image(&self, sku: &str) -> Option<String>;
}

/// Catalog-backed lookup with a persisted SKU cache.
///
/// Successful answers are cached, including empty ones. Failed requests
/// are not, so the SKU is retried on its next message.
pub struct CatalogImages {
    client: CatalogClient,
    cache: Mutex<ImageCache>,
}

impl CatalogImages {
    pub fn new(client: CatalogClient, cache: ImageCache) -> Self {
        Self {
            client,
            cache: Mutex::new(cache),
        }
    }
}

#[async_trait]
impl ImageLookup for CatalogImages {
    async fn first_image(&self, sku: &str) -> Option<String> {
        if let Some(urls) = self.cache.lock().await.get(sku) {
            return first_http(urls);
        }

        let urls = match self.client.fetch_images(sku).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("[IMAGES] Lookup for {} failed: {}", sku, e);
                return None;
            }
        };
        debug!("[IMAGES] {} has {} images", sku, urls.len());

        let first = first_http(&urls);
        let mut cache = self.cache.lock().await;
        cache.insert(sku, urls);
        if let Err(e) = cache.save() {
            warn!(
                "[IMAGES] Failed to save cache {}: {}",
                cache.path().display(),
                e
            );
        }

        first
    }
}

fn first_http(urls: &[String]) -> Option<String> {
    urls.first().filter(|u| u.starts_with("http")).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Config;

    fn client() -> CatalogClient {
        // Nothing listens on the discard port, so any lookup fails fast
        CatalogClient::new(&Config {
            slack_bot_token: None,
            slack_channel_id: String::new(),
            slack_api_url: "https://slack.com/api".to_string(),
            catalog_api_url: "http://127.0.0.1:9/catalogo/consulta.php".to_string(),
            branches: Vec::new(),
            families: Vec::new(),
            state_file: "state.json".to_string(),
            catalog_snapshot_file: "snapshot.json".to_string(),
            image_cache_file: "images.json".to_string(),
        })
    }

    fn temp_cache(tag: &str) -> ImageCache {
        let path =
            std::env::temp_dir().join(format!("notifier-images-{}-{}.json", tag, uuid::Uuid::new_v4()));
        ImageCache::load(path)
    }

    #[test]
    fn test_first_http_skips_relative_urls() {
        assert_eq!(
            first_http(&["https://x/a.jpg".to_string(), "b.jpg".to_string()]),
            Some("https://x/a.jpg".to_string())
        );
        assert_eq!(first_http(&["./a.jpg".to_string()]), None);
        assert_eq!(first_http(&[]), None);
    }

    #[tokio::test]
    async fn test_cached_sku_skips_catalog() {
        let mut cache = temp_cache("hit");
        cache.insert("1001", vec!["https://x/1001.jpg".to_string()]);
        cache.insert("1002", Vec::new());

        let images = CatalogImages::new(client(), cache);

        assert_eq!(
            images.first_image("1001").await,
            Some("https://x/1001.jpg".to_string())
        );
        assert_eq!(images.first_image("1002").await, None);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_not_cached() {
        let images = CatalogImages::new(client(), temp_cache("miss"));

        assert_eq!(images.first_image("1003").await, None);
        assert!(images.cache.lock().await.get("1003").is_none());
    }
}
