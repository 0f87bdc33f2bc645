//! Historical record of every listing attempt, one entry per SKU.
//!
//! Writes replace the whole stored value. Only the generated `id` of an
//! existing entry carries over.

use crate::models::{ListingResult, SourceMarketplace};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const REDIS_KEY_PREFIX: &str = "relister:listing:";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(String),
    #[error("serialization: {0}")]
    Serde(String),
    #[error("redis: {0}")]
    Redis(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredListing {
    pub id: Uuid,
    pub sku: String,
    pub title: String,
    pub source: SourceMarketplace,
    pub source_price: f64,
    pub result: ListingResult,
    pub updated_at: DateTime<Utc>,
}

impl StoredListing {
    pub fn new(
        sku: &str,
        title: &str,
        source: SourceMarketplace,
        source_price: f64,
        result: ListingResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sku: sku.to_string(),
            title: title.to_string(),
            source,
            source_price,
            result,
            updated_at: Utc::now(),
        }
    }

    fn replacing(self, existing: Option<&StoredListing>) -> Self {
        match existing {
            Some(previous) => Self {
                id: previous.id,
                ..self
            },
            None => self,
        }
    }
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Last write wins; returns the value as stored.
    async fn upsert(&self, listing: StoredListing) -> Result<StoredListing, StoreError>;
    async fn get(&self, sku: &str) -> Result<Option<StoredListing>, StoreError>;
}

/// Writes to a temp sibling and renames over the target.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

pub struct JsonFileStore {
    path: PathBuf,
    listings: Mutex<BTreeMap<String, StoredListing>>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let listings = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| StoreError::Serde(err.to_string()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(StoreError::Io(err.to_string())),
        };
        Ok(Self {
            path,
            listings: Mutex::new(listings),
        })
    }
}

#[async_trait]
impl ListingStore for JsonFileStore {
    async fn upsert(&self, listing: StoredListing) -> Result<StoredListing, StoreError> {
        let mut listings = self.listings.lock().await;
        let existing = listings.get(&listing.sku).cloned();
        let stored = listing.replacing(existing.as_ref());
        let previous = listings.insert(stored.sku.clone(), stored.clone());
        let bytes = serde_json::to_vec_pretty(&*listings).map_err(|err| StoreError::Serde(err.to_string()))?;
        if let Err(err) = write_atomic(&self.path, &bytes).await {
            match previous {
                Some(previous) => listings.insert(previous.sku.clone(), previous),
                None => listings.remove(&stored.sku),
            };
            return Err(StoreError::Io(err.to_string()));
        }
        debug!(target = "relister.store", sku = %stored.sku, id = %stored.id, "listing_stored");
        Ok(stored)
    }

    async fn get(&self, sku: &str) -> Result<Option<StoredListing>, StoreError> {
        Ok(self.listings.lock().await.get(sku).cloned())
    }
}

pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self, StoreError> {
        redis::Client::open(url)
            .map(|client| Self { client })
            .map_err(|err| StoreError::Redis(err.to_string()))
    }

    fn key(sku: &str) -> String {
        format!("{REDIS_KEY_PREFIX}{sku}")
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| StoreError::Redis(err.to_string()))
    }
}

#[async_trait]
impl ListingStore for RedisStore {
    async fn upsert(&self, listing: StoredListing) -> Result<StoredListing, StoreError> {
        let mut conn = self.connection().await?;
        let key = Self::key(&listing.sku);
        let existing: Option<String> = conn
            .get(&key)
            .await
            .map_err(|err| StoreError::Redis(err.to_string()))?;
        let existing = existing.and_then(|raw| serde_json::from_str::<StoredListing>(&raw).ok());
        let stored = listing.replacing(existing.as_ref());
        let json = serde_json::to_string(&stored).map_err(|err| StoreError::Serde(err.to_string()))?;
        let _: () = conn
            .set(&key, json)
            .await
            .map_err(|err| StoreError::Redis(err.to_string()))?;
        debug!(target = "relister.store", sku = %stored.sku, id = %stored.id, "listing_stored");
        Ok(stored)
    }

    async fn get(&self, sku: &str) -> Result<Option<StoredListing>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(Self::key(sku))
            .await
            .map_err(|err| StoreError::Redis(err.to_string()))?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(|err| StoreError::Serde(err.to_string())))
            .transpose()
    }
}
