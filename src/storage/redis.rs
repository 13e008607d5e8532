// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis document store.
//!
//! Each document is one STRING value holding its compact JSON text:
//!
//! ```text
//! SET plan_12xvxc345ssdsds-508 '{"objectId":"12xvxc345ssdsds-508","objectType":"plan",...}'
//! ```
//!
//! An empty string is treated the same as a missing key.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, cmd};

use crate::config::PlanSyncConfig;
use crate::document::{Document, StoreKey};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{DocumentStore, StorageError};

pub struct RedisStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "myapp:" → "myapp:plan_p1")
    prefix: String,
}

impl RedisStore {
    /// Create a new Redis store without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Create a new Redis store with an optional key prefix.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use plan_sync_engine::storage::redis::RedisStore;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys will be prefixed: "myapp:plan_p1"
    /// let store = RedisStore::with_prefix("redis://localhost", Some("myapp:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Fast-fail on startup instead of hanging on a bad URL
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        Ok(Self::from_connection(connection, prefix))
    }

    /// Connect to `redis_url`, namespacing keys with `redis_prefix`.
    pub async fn from_config(config: &PlanSyncConfig) -> Result<Self, StorageError> {
        Self::with_prefix(&config.redis_url, config.redis_prefix.as_deref()).await
    }

    /// Wrap an existing connection (shared with the change feed).
    #[must_use]
    pub fn from_connection(connection: ConnectionManager, prefix: Option<&str>) -> Self {
        Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        }
    }

    #[inline]
    fn prefixed_key(&self, key: &StoreKey) -> String {
        if self.prefix.is_empty() {
            key.as_str().to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    /// Get a clone of the connection manager.
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    #[tracing::instrument(skip(self, key), fields(key = %key))]
    async fn get(&self, key: &StoreKey) -> Result<Option<Document>, StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        let raw: Option<String> = retry("redis_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            async move {
                let data: Option<String> = conn.get(&key).await?;
                Ok::<_, redis::RedisError>(data)
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        match raw {
            None => Ok(None),
            Some(text) if text.is_empty() => Ok(None),
            Some(text) => {
                let doc = Document::from_json_str(&text).map_err(|e| {
                    crate::metrics::record_corruption("redis");
                    StorageError::Corruption {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(doc))
            }
        }
    }

    async fn set(&self, key: &StoreKey, doc: &Document) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);
        let payload = doc.to_json_string();

        retry("redis_set", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            let payload = payload.clone();
            async move {
                let _: () = conn.set(&key, payload).await?;
                Ok::<_, redis::RedisError>(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &StoreKey) -> Result<bool, StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        retry("redis_delete", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            async move {
                let removed: u64 = conn.del(&key).await?;
                Ok::<_, redis::RedisError>(removed > 0)
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }

    async fn exists(&self, key: &StoreKey) -> Result<bool, StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        // STRLEN is 0 for both a missing key and an empty value
        retry("redis_strlen", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            async move {
                let len: u64 = cmd("STRLEN").arg(&key).query_async(&mut conn).await?;
                Ok::<_, redis::RedisError>(len > 0)
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
    }
}
