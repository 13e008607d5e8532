// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search index service.
//!
//! The index holds one entry per [`IndexNode`], keyed by the node id and
//! routed by the tree's root id. A join field records each entry's relation
//! (and parent, for non-root entries).
//!
//! Backends:
//! - [`memory::InMemoryIndex`]: DashMap, for tests and embedding
//! - [`elastic::ElasticIndex`]: Elasticsearch-compatible HTTP API
//!
//! Every mutation is idempotent: re-upserting a node replaces it, deleting a
//! missing id reports [`DeleteOutcome::NotFound`], and creating an existing
//! index reports [`CreateOutcome::AlreadyExists`].

pub mod elastic;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::flatten::IndexNode;
use crate::join::JoinSchema;

pub use elastic::ElasticIndex;
pub use memory::InMemoryIndex;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Search index request failed: {0}")]
    Transport(String),
    #[error("Search index rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Search index misconfigured: {0}")]
    Config(String),
}

/// Result of an index creation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Already there (possibly created concurrently by another consumer)
    AlreadyExists,
}

/// Result of a single-entry delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Index name, for logs.
    fn name(&self) -> &str;

    async fn exists(&self) -> Result<bool, IndexError>;

    /// Create the index with the join mapping for `schema`.
    async fn create(&self, schema: &JoinSchema) -> Result<CreateOutcome, IndexError>;

    /// Insert or replace the entry for `node`, routed by its routing id.
    async fn upsert(&self, node: &IndexNode) -> Result<(), IndexError>;

    async fn delete(&self, id: &str, routing: Option<&str>) -> Result<DeleteOutcome, IndexError>;

    /// Create the index unless it already exists.
    async fn ensure(&self, schema: &JoinSchema) -> Result<CreateOutcome, IndexError> {
        if self.exists().await? {
            return Ok(CreateOutcome::AlreadyExists);
        }
        self.create(schema).await
    }
}
