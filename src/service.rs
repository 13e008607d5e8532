// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Plan document access layer.
//!
//! Wraps a [`DocumentStore`] and a [`ChangePublisher`]: every successful write
//! is stamped with a [`VersionTag`] and followed by a change event for the
//! indexer. Store write and publish are not atomic; a failed publish after a
//! successful write is reported as [`ServiceError::Publish`] and the caller
//! decides whether to retry.
//!
//! | Operation | Missing   | Exists             | Event  |
//! |-----------|-----------|--------------------|--------|
//! | create    | store     | `Conflict`         | SAVE   |
//! | get       | `NotFound`| document or 304    | none   |
//! | patch     | `NotFound`| merge if tag match | SAVE   |
//! | delete    | `NotFound`| remove             | DELETE |

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::config::PlanSyncConfig;
use crate::document::{Document, DocumentError, StoreKey};
use crate::feed::{ChangeEvent, ChangePublisher, FeedError};
use crate::merge::merge;
use crate::storage::{DocumentStore, StorageError};
use crate::version::VersionTag;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document '{0}' not found")]
    NotFound(StoreKey),
    #[error("Document '{0}' already exists")]
    Conflict(StoreKey),
    #[error("Precondition failed for '{key}': {reason}")]
    PreconditionFailed { key: StoreKey, reason: String },
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Stored '{key}' but publishing the change failed: {source}")]
    Publish { key: StoreKey, source: FeedError },
}

impl From<DocumentError> for ServiceError {
    fn from(e: DocumentError) -> Self {
        ServiceError::InvalidDocument(e.to_string())
    }
}

impl ServiceError {
    /// HTTP status an API layer would answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::PreconditionFailed { .. } => 412,
            ServiceError::InvalidDocument(_) => 400,
            ServiceError::Storage(_) => 500,
            ServiceError::Publish { .. } => 502,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::PreconditionFailed { .. } => "precondition_failed",
            ServiceError::InvalidDocument(_) => "invalid",
            ServiceError::Storage(_) => "storage_error",
            ServiceError::Publish { .. } => "publish_error",
        }
    }
}

/// Result of a conditional read.
#[derive(Debug, Clone, PartialEq)]
pub enum GetOutcome {
    Found { document: Document, tag: VersionTag },
    /// The caller's `If-None-Match` matched the current tag
    NotModified { tag: VersionTag },
}

pub struct PlanService<S: ?Sized, P: ?Sized> {
    store: Arc<S>,
    publisher: Arc<P>,
    root_type: String,
    /// Serializes writes to one key within this process
    write_locks: DashMap<StoreKey, Arc<AsyncMutex<()>>>,
}

impl<S, P> PlanService<S, P>
where
    S: DocumentStore + ?Sized,
    P: ChangePublisher + ?Sized,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>) -> Self {
        Self {
            store,
            publisher,
            root_type: "plan".to_string(),
            write_locks: DashMap::new(),
        }
    }

    /// Service for the configured `root_object_type`.
    pub fn from_config(store: Arc<S>, publisher: Arc<P>, config: &PlanSyncConfig) -> Self {
        Self::new(store, publisher).with_root_type(config.root_object_type.clone())
    }

    /// objectType of the documents this service manages.
    pub fn with_root_type(mut self, root_type: impl Into<String>) -> Self {
        self.root_type = root_type.into();
        self
    }

    #[must_use]
    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    fn key(&self, id: &str) -> StoreKey {
        StoreKey::new(&self.root_type, id)
    }

    fn write_lock(&self, key: &StoreKey) -> Arc<AsyncMutex<()>> {
        self.write_locks.entry(key.clone()).or_default().clone()
    }

    fn release(&self, key: &StoreKey) {
        self.write_locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn publish(&self, key: &StoreKey, event: ChangeEvent) -> Result<(), ServiceError> {
        match self.publisher.publish(&event).await {
            Ok(delivery) => {
                crate::metrics::record_published(event.operation.label());
                info!(key = %key, operation = %event.operation, delivery = %delivery, "Change published");
                Ok(())
            }
            Err(source) => {
                warn!(key = %key, operation = %event.operation, error = %source, "Change publish failed after store write");
                Err(ServiceError::Publish { key: key.clone(), source })
            }
        }
    }

    fn record<T>(operation: &str, result: &Result<T, ServiceError>) {
        let status = match result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        crate::metrics::record_service_request(operation, status);
    }

    /// Store a new document and publish a SAVE.
    #[tracing::instrument(skip(self, document), fields(id = ?document.object_id()))]
    pub async fn create(&self, document: Document) -> Result<VersionTag, ServiceError> {
        let result = self.create_inner(document).await;
        Self::record("create", &result);
        result
    }

    async fn create_inner(&self, document: Document) -> Result<VersionTag, ServiceError> {
        let key = StoreKey::for_document(&document)?;
        if document.object_type() != Some(self.root_type.as_str()) {
            return Err(ServiceError::InvalidDocument(format!(
                "expected objectType '{}'",
                self.root_type
            )));
        }

        let lock = self.write_lock(&key);
        let result = async {
            let _guard = lock.lock().await;
            if self.store.exists(&key).await? {
                return Err(ServiceError::Conflict(key.clone()));
            }
            self.store.set(&key, &document).await?;
            let tag = VersionTag::of(&document);
            self.publish(&key, ChangeEvent::save(document)).await?;
            Ok(tag)
        }
        .await;
        drop(lock);
        self.release(&key);
        result
    }

    /// Read a document. `if_none_match` is the raw `If-None-Match` header.
    #[tracing::instrument(skip(self, if_none_match))]
    pub async fn get(&self, id: &str, if_none_match: Option<&str>) -> Result<GetOutcome, ServiceError> {
        let result = self.get_inner(id, if_none_match).await;
        Self::record("get", &result);
        result
    }

    async fn get_inner(&self, id: &str, if_none_match: Option<&str>) -> Result<GetOutcome, ServiceError> {
        let key = self.key(id);
        let document = self
            .store
            .get(&key)
            .await?
            .ok_or(ServiceError::NotFound(key))?;
        let tag = VersionTag::of(&document);

        if if_none_match.is_some_and(|header| tag.matches_any(header)) {
            return Ok(GetOutcome::NotModified { tag });
        }
        Ok(GetOutcome::Found { document, tag })
    }

    /// Merge `update` into the stored document. `if_match` is the raw
    /// `If-Match` header and must name the current tag.
    #[tracing::instrument(skip(self, update, if_match))]
    pub async fn patch(
        &self,
        id: &str,
        update: Document,
        if_match: Option<&str>,
    ) -> Result<(Document, VersionTag), ServiceError> {
        let result = self.patch_inner(id, update, if_match).await;
        Self::record("patch", &result);
        result
    }

    async fn patch_inner(
        &self,
        id: &str,
        update: Document,
        if_match: Option<&str>,
    ) -> Result<(Document, VersionTag), ServiceError> {
        if update.object_id().is_some_and(|uid| uid != id) {
            return Err(ServiceError::InvalidDocument("objectId cannot change".to_string()));
        }
        if update.object_type().is_some_and(|t| t != self.root_type) {
            return Err(ServiceError::InvalidDocument("objectType cannot change".to_string()));
        }

        let key = self.key(id);
        let lock = self.write_lock(&key);
        let result = async {
            let _guard = lock.lock().await;
            let mut document = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| ServiceError::NotFound(key.clone()))?;

            let current = VersionTag::of(&document);
            match if_match {
                None => {
                    return Err(ServiceError::PreconditionFailed {
                        key: key.clone(),
                        reason: "If-Match required".to_string(),
                    })
                }
                Some(header) if !current.matches_any(header) => {
                    return Err(ServiceError::PreconditionFailed {
                        key: key.clone(),
                        reason: format!("current tag is {}", current.header_value()),
                    })
                }
                Some(_) => {}
            }

            let summary = merge(&mut document, &update);
            let tag = VersionTag::of(&document);
            if summary.is_noop() {
                info!(key = %key, "Patch changed nothing");
                return Ok((document, tag));
            }

            self.store.set(&key, &document).await?;
            self.publish(&key, ChangeEvent::save(document.clone())).await?;
            Ok((document, tag))
        }
        .await;
        drop(lock);
        self.release(&key);
        result
    }

    /// Remove a document and publish a DELETE carrying its last content.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        let result = self.delete_inner(id).await;
        Self::record("delete", &result);
        result
    }

    async fn delete_inner(&self, id: &str) -> Result<(), ServiceError> {
        let key = self.key(id);
        let lock = self.write_lock(&key);
        let result = async {
            let _guard = lock.lock().await;
            let document = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| ServiceError::NotFound(key.clone()))?;

            if !self.store.delete(&key).await? {
                return Err(ServiceError::NotFound(key.clone()));
            }
            self.publish(&key, ChangeEvent::delete(document)).await
        }
        .await;
        drop(lock);
        self.release(&key);
        result
    }
}
