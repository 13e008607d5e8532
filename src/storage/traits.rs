// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::document::{Document, StoreKey};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored value for '{key}' is not a valid document: {reason}")]
    Corruption {
        key: String,
        reason: String,
    },
}

/// Key-value store holding one document per [`StoreKey`].
///
/// No multi-key transactions: each call stands alone.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &StoreKey) -> Result<Option<Document>, StorageError>;
    async fn set(&self, key: &StoreKey, doc: &Document) -> Result<(), StorageError>;

    /// Remove a document. Returns whether anything was removed.
    async fn delete(&self, key: &StoreKey) -> Result<bool, StorageError>;

    /// Default implementation falls back to a full read.
    async fn exists(&self, key: &StoreKey) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
