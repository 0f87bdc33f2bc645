use crate::catalog::CatalogError;
use crate::catalog::tree::CategoryTree;
use crate::ebay::{EbayClient, TAXONOMY_SCOPES};
use crate::store::write_atomic;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub const DEFAULT_TTL_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Fresh snapshot read from disk.
    Loaded,
    Downloaded,
    /// Download failed; the expired snapshot stays in service.
    Stale,
}

/// Category taxonomy with a persisted snapshot and a TTL.
///
/// Readers take an `Arc` of the current snapshot; a refresh builds a new tree
/// and swaps it in, so readers never observe a partially built tree.
pub struct CategoryCache {
    path: PathBuf,
    ttl: Duration,
    snapshot: RwLock<Arc<CategoryTree>>,
}

impl CategoryCache {
    pub fn new(path: impl AsRef<Path>, ttl_days: i64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ttl: Duration::days(ttl_days.max(1)),
            snapshot: RwLock::new(Arc::new(CategoryTree::empty())),
        }
    }

    pub fn snapshot(&self) -> Arc<CategoryTree> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, tree: CategoryTree) {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(tree);
    }

    fn is_fresh(&self, tree: &CategoryTree) -> bool {
        !tree.is_empty() && Utc::now() - tree.fetched_at < self.ttl
    }

    pub async fn initialize(&self, ebay: &EbayClient) -> Result<CacheStatus, CatalogError> {
        let on_disk = match self.load_snapshot().await {
            Ok(tree) => tree,
            Err(err) => {
                warn!(target = "relister.catalog", error = %err, "category_snapshot_unreadable");
                None
            }
        };

        let had_stale = match on_disk {
            Some(tree) if self.is_fresh(&tree) => {
                info!(
                    target = "relister.catalog",
                    categories = tree.len(),
                    version = %tree.version,
                    "category_snapshot_loaded"
                );
                self.replace(tree);
                return Ok(CacheStatus::Loaded);
            }
            Some(tree) if !tree.is_empty() => {
                self.replace(tree);
                true
            }
            _ => false,
        };

        match self.refresh(ebay).await {
            Ok(()) => Ok(CacheStatus::Downloaded),
            Err(err) if had_stale => {
                warn!(
                    target = "relister.catalog",
                    error = %err,
                    "category_refresh_failed_using_stale_snapshot"
                );
                Ok(CacheStatus::Stale)
            }
            Err(err) => Err(err),
        }
    }

    /// Downloads the full tree, persists it, then swaps it in.
    pub async fn refresh(&self, ebay: &EbayClient) -> Result<(), CatalogError> {
        let token = ebay
            .app_token(TAXONOMY_SCOPES)
            .await
            .map_err(|err| CatalogError::Remote(err.to_string()))?;
        let tree_ref = ebay
            .default_category_tree(&token)
            .await
            .map_err(|err| CatalogError::Remote(err.to_string()))?;
        let response = ebay
            .category_tree(&token, &tree_ref.category_tree_id)
            .await
            .map_err(|err| CatalogError::Remote(err.to_string()))?;

        let tree = CategoryTree::from_taxonomy(response, Utc::now());
        if tree.is_empty() {
            return Err(CatalogError::EmptyTaxonomy);
        }
        let bytes = serde_json::to_vec(&tree).map_err(|err| CatalogError::Io(err.to_string()))?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|err| CatalogError::Io(err.to_string()))?;
        info!(
            target = "relister.catalog",
            categories = tree.len(),
            leaves = tree.leaves(0, u32::MAX).len(),
            version = %tree.version,
            "category_tree_downloaded"
        );
        self.replace(tree);
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<CategoryTree>, CatalogError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| CatalogError::Io(format!("{}: {err}", self.path.display()))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CatalogError::Io(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpSettings;
    use crate::test_support::{ebay_config, sample_tree};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_oauth(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/identity/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "app", "expires_in": 7200
            })))
            .mount(server)
            .await;
    }

    async fn write_tree(path: &Path, age_days: i64) {
        let mut tree = sample_tree();
        tree.fetched_at = Utc::now() - Duration::days(age_days);
        tokio::fs::write(path, serde_json::to_vec(&tree).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fresh_snapshot_skips_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("categories.json");
        write_tree(&file, 10).await;

        let cache = CategoryCache::new(&file, DEFAULT_TTL_DAYS);
        let ebay = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
        assert_eq!(cache.initialize(&ebay).await.unwrap(), CacheStatus::Loaded);
        assert!(cache.snapshot().get("20625").is_some());
    }

    #[tokio::test]
    async fn expired_snapshot_is_kept_when_download_fails() {
        let server = MockServer::start().await;
        mount_oauth(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("categories.json");
        write_tree(&file, 120).await;

        let cache = CategoryCache::new(&file, DEFAULT_TTL_DAYS);
        let ebay = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
        assert_eq!(cache.initialize(&ebay).await.unwrap(), CacheStatus::Stale);
        assert_eq!(cache.snapshot().len(), sample_tree().len());
    }

    #[tokio::test]
    async fn no_snapshot_and_failed_download_is_an_error() {
        let server = MockServer::start().await;
        mount_oauth(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let cache = CategoryCache::new(dir.path().join("categories.json"), DEFAULT_TTL_DAYS);
        let ebay = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
        assert!(cache.initialize(&ebay).await.is_err());
        assert!(cache.snapshot().is_empty());
    }

    #[tokio::test]
    async fn download_persists_and_swaps() {
        let server = MockServer::start().await;
        mount_oauth(&server).await;
        Mock::given(method("GET"))
            .and(path("/commerce/taxonomy/v1/get_default_category_tree_id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "categoryTreeId": "0", "categoryTreeVersion": "131"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/commerce/taxonomy/v1/category_tree/0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "categoryTreeId": "0",
                "categoryTreeVersion": "131",
                "rootCategoryNode": {
                    "category": {"categoryId": "0", "categoryName": "Root"},
                    "childCategoryTreeNodes": [{
                        "category": {"categoryId": "1", "categoryName": "Home & Garden"},
                        "childCategoryTreeNodes": [{
                            "category": {"categoryId": "20625", "categoryName": "Water Bottles"},
                            "leafCategoryTreeNode": true
                        }]
                    }]
                }
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("categories.json");
        let cache = CategoryCache::new(&file, DEFAULT_TTL_DAYS);
        let ebay = EbayClient::new(ebay_config(&server.uri()), &HttpSettings::default());
        assert_eq!(cache.initialize(&ebay).await.unwrap(), CacheStatus::Downloaded);
        assert_eq!(cache.snapshot().version, "131");

        let reloaded = CategoryCache::new(&file, DEFAULT_TTL_DAYS);
        assert_eq!(reloaded.initialize(&ebay).await.unwrap(), CacheStatus::Loaded);
        assert_eq!(reloaded.snapshot().path("20625").as_deref(), Some("Home & Garden > Water Bottles"));
    }
}
