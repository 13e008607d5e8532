// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::flatten::IndexNode;
use crate::join::JoinSchema;
use super::{CreateOutcome, DeleteOutcome, IndexError, SearchIndex};

/// One stored index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEntry {
    pub routing: String,
    /// Scalar fields plus the join field
    pub source: Value,
}

/// In-process index with the same idempotence rules as a real one.
pub struct InMemoryIndex {
    name: String,
    join_field: String,
    exists: AtomicBool,
    schema: RwLock<Option<JoinSchema>>,
    entries: DashMap<String, IndexedEntry>,
    create_calls: AtomicU64,
    upserts: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryIndex {
    #[must_use]
    pub fn new(name: impl Into<String>, join_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            join_field: join_field.into(),
            exists: AtomicBool::new(false),
            schema: RwLock::new(None),
            entries: DashMap::new(),
            create_calls: AtomicU64::new(0),
            upserts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Mark the index as already existing, as if another consumer made it.
    pub fn preexisting(self) -> Self {
        self.exists.store(true, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<IndexedEntry> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entry ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Schema the index was created with, if this instance created it.
    #[must_use]
    pub fn schema(&self) -> Option<JoinSchema> {
        self.schema.read().clone()
    }

    #[must_use]
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn upsert_count(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new("plan-index", "plan_join")
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, IndexError> {
        Ok(self.exists.load(Ordering::SeqCst))
    }

    async fn create(&self, schema: &JoinSchema) -> Result<CreateOutcome, IndexError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.exists.swap(true, Ordering::SeqCst) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        *self.schema.write() = Some(schema.clone());
        Ok(CreateOutcome::Created)
    }

    async fn upsert(&self, node: &IndexNode) -> Result<(), IndexError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(
            node.id.clone(),
            IndexedEntry {
                routing: node.routing_id.clone(),
                source: node.to_source(&self.join_field),
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &str, _routing: Option<&str>) -> Result<DeleteOutcome, IndexError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(match self.entries.remove(id) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }
}
