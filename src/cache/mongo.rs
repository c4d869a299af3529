use async_trait::async_trait;
use bson::{doc, DateTime as BsonDateTime};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::CacheStore;
use crate::error::CacheError;

const COLLECTION: &str = "index_cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedIndex {
    #[serde(rename = "_id")]
    pub cache_key: String,
    pub payload: String,
    pub expires_at: BsonDateTime,
    pub created_at: BsonDateTime,
}

impl CachedIndex {
    fn new(cache_key: &str, payload: String, ttl: Duration) -> Self {
        let created_at = BsonDateTime::now();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            cache_key: cache_key.to_string(),
            payload,
            expires_at: BsonDateTime::from_millis(
                created_at.timestamp_millis().saturating_add(ttl_ms),
            ),
            created_at,
        }
    }
}

/// MongoDB-backed store shared across service instances. Expired documents
/// are filtered on read and reaped by a TTL index on `expires_at`.
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub async fn connect(url: &str, db_name: &str) -> Result<Self, CacheError> {
        let client = Client::with_uri_str(url).await?;
        let db = client.database(db_name);

        Ok(Self { client, db })
    }

    fn collection(&self) -> Collection<CachedIndex> {
        self.db.collection(COLLECTION)
    }
}

#[async_trait]
impl CacheStore for MongoStore {
    async fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        let cached = self
            .collection()
            .find_one(doc! { "_id": key, "expires_at": { "$gt": BsonDateTime::now() } })
            .await?;
        Ok(cached.map(|c| c.payload))
    }

    async fn store(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
        let cached = CachedIndex::new(key, payload, ttl);

        self.collection()
            .replace_one(doc! { "_id": key }, &cached)
            .upsert(true)
            .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.collection().delete_one(doc! { "_id": key }).await?;
        Ok(())
    }

    async fn init(&self) -> Result<(), CacheError> {
        let ttl_index = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .expire_after(Duration::from_secs(0))
                    .build(),
            )
            .build();
        self.collection().create_index(ttl_index).await?;
        Ok(())
    }

    async fn shutdown(&self) {
        self.client.clone().shutdown().await;
    }

    fn name(&self) -> &'static str {
        "mongodb"
    }
}
