// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::document::{Document, StoreKey};
use super::traits::{DocumentStore, StorageError};

pub struct InMemoryStore {
    data: DashMap<StoreKey, Document>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current document count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all documents
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<Document>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn set(&self, key: &StoreKey, doc: &Document) -> Result<(), StorageError> {
        self.data.insert(key.clone(), doc.clone());
        Ok(())
    }

    async fn delete(&self, key: &StoreKey) -> Result<bool, StorageError> {
        Ok(self.data.remove(key).is_some())
    }

    async fn exists(&self, key: &StoreKey) -> Result<bool, StorageError> {
        Ok(self.data.contains_key(key))
    }
}
