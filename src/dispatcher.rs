// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronization dispatcher: applies change events to the search index.
//!
//! # Event Lifecycle
//!
//! ```text
//! received ──► decode ──► bootstrap (once) ──► SAVE: flatten + upsert ──► ack
//!                │                          └► DELETE: collect + delete ─► ack
//!                └► malformed ──────────────────────────► dropped ───────► ack
//! ```
//!
//! An index failure leaves the event unacked, so the feed redelivers it.
//! Upserts and deletes are idempotent, which makes redelivery safe; nothing
//! is retried inside the dispatcher.
//!
//! # Concurrency
//!
//! [`Dispatcher::run`] applies up to `worker_concurrency` events at once.
//! Events for the same root id are serialized through a per-root lock taken in
//! delivery order, so SAVE/DELETE on one tree keep their feed order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex, OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::feed::{ChangeEvent, ChangeFeed, Delivery, FeedError, Operation};
use crate::flatten::{collect_ids, flatten, IndexNode};
use crate::index::{CreateOutcome, DeleteOutcome, IndexError, SearchIndex};
use crate::join::JoinSchema;
use crate::resilience::retry::RetryConfig;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Index bootstrap failed: {0}")]
    Bootstrap(#[source] IndexError),
    #[error("Index upsert failed for '{id}': {source}")]
    Upsert { id: String, source: IndexError },
    #[error("Index delete failed for '{id}': {source}")]
    Delete { id: String, source: IndexError },
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Saved { nodes: usize },
    Deleted { ids: usize, missing: usize },
    Dropped { reason: String },
}

impl EventOutcome {
    fn label(&self) -> &'static str {
        match self {
            EventOutcome::Saved { .. } => "saved",
            EventOutcome::Deleted { .. } => "deleted",
            EventOutcome::Dropped { .. } => "dropped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Created,
    Running,
    /// Shutdown requested, waiting for in-flight events
    Draining,
    Stopped,
}

pub struct Dispatcher {
    index: Arc<dyn SearchIndex>,
    schema: JoinSchema,
    bootstrapped: OnceCell<CreateOutcome>,
    root_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    concurrency: usize,
    in_flight: AtomicUsize,
    state: watch::Sender<DispatcherState>,
}

impl Dispatcher {
    pub fn new(index: Arc<dyn SearchIndex>, schema: JoinSchema) -> Self {
        let (state, _) = watch::channel(DispatcherState::Created);
        Self {
            index,
            schema,
            bootstrapped: OnceCell::new(),
            root_locks: DashMap::new(),
            concurrency: 1,
            in_flight: AtomicUsize::new(0),
            state,
        }
    }

    /// Events applied in parallel by [`Self::run`] (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.initialized()
    }

    /// Ensure the index and its join mapping exist. Succeeds at most once;
    /// a failure is retried on the next call.
    pub async fn bootstrap(&self) -> Result<CreateOutcome, SyncError> {
        let outcome = self
            .bootstrapped
            .get_or_try_init(|| async {
                let outcome = self.index.ensure(&self.schema).await?;
                match outcome {
                    CreateOutcome::Created => {
                        info!(index = %self.index.name(), "Search index created");
                        crate::metrics::record_bootstrap("created");
                    }
                    CreateOutcome::AlreadyExists => {
                        info!(index = %self.index.name(), "Search index already exists");
                        crate::metrics::record_bootstrap("already_exists");
                    }
                }
                Ok::<_, IndexError>(outcome)
            })
            .await
            .map_err(|e| {
                crate::metrics::record_bootstrap("failed");
                SyncError::Bootstrap(e)
            })?;
        Ok(*outcome)
    }

    /// Decode and apply one delivery.
    ///
    /// Does not serialize per root; concurrent callers must do that themselves.
    pub async fn handle(&self, delivery: &Delivery) -> Result<EventOutcome, SyncError> {
        self.handle_decoded(&delivery.id, ChangeEvent::decode(&delivery.fields)).await
    }

    async fn handle_decoded(
        &self,
        delivery_id: &str,
        decoded: Result<ChangeEvent, FeedError>,
    ) -> Result<EventOutcome, SyncError> {
        match decoded {
            Ok(event) => self.apply(&event).await,
            Err(e) => {
                warn!(delivery = %delivery_id, error = %e, "Dropping change event");
                crate::metrics::record_event("unknown", "dropped");
                Ok(EventOutcome::Dropped { reason: e.to_string() })
            }
        }
    }

    /// Apply a decoded event.
    #[tracing::instrument(skip(self, event), fields(operation = %event.operation, root = ?event.document.object_id()))]
    pub async fn apply(&self, event: &ChangeEvent) -> Result<EventOutcome, SyncError> {
        let _timer = crate::metrics::LatencyTimer::new(event.operation.label());
        let result = match event.operation {
            Operation::Save => self.save(event).await,
            Operation::Delete => self.delete(event).await,
        };

        let label = event.operation.label();
        match &result {
            Ok(outcome) => crate::metrics::record_event(label, outcome.label()),
            Err(_) => crate::metrics::record_event(label, "failed"),
        }
        result
    }

    async fn save(&self, event: &ChangeEvent) -> Result<EventOutcome, SyncError> {
        let nodes = match flatten(&event.document) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Dropping SAVE without a root id");
                return Ok(EventOutcome::Dropped { reason: e.to_string() });
            }
        };

        self.bootstrap().await?;
        self.check_schema(&nodes);

        for node in &nodes {
            self.index
                .upsert(node)
                .await
                .map_err(|source| SyncError::Upsert { id: node.id.clone(), source })?;
        }

        crate::metrics::record_index_upserts(nodes.len());
        debug!(nodes = nodes.len(), "Tree indexed");
        Ok(EventOutcome::Saved { nodes: nodes.len() })
    }

    async fn delete(&self, event: &ChangeEvent) -> Result<EventOutcome, SyncError> {
        let ids = collect_ids(&event.document);
        if ids.is_empty() {
            warn!("Dropping DELETE with no objectId in the tree");
            return Ok(EventOutcome::Dropped { reason: "no objectId in document".to_string() });
        }

        self.bootstrap().await?;

        let routing = event.document.object_id();
        let mut missing = 0;
        for id in &ids {
            let outcome = self
                .index
                .delete(id, routing)
                .await
                .map_err(|source| SyncError::Delete { id: id.clone(), source })?;
            if outcome == DeleteOutcome::NotFound {
                missing += 1;
            }
        }

        crate::metrics::record_index_deletes(ids.len() - missing, missing);
        debug!(ids = ids.len(), missing, "Tree removed from index");
        Ok(EventOutcome::Deleted { ids: ids.len(), missing })
    }

    /// Warn about nodes the join mapping does not declare. The index decides
    /// whether to reject them.
    fn check_schema(&self, nodes: &[IndexNode]) {
        let relations: HashMap<&str, &str> = nodes
            .iter()
            .map(|n| (n.id.as_str(), n.relation_name.as_str()))
            .collect();

        for node in nodes {
            match &node.parent_id {
                None if node.relation_name != self.schema.root() => warn!(
                    id = %node.id,
                    relation = %node.relation_name,
                    expected = %self.schema.root(),
                    "Root relation not declared in join schema"
                ),
                None => {}
                Some(parent) => {
                    let parent_relation = relations.get(parent.as_str()).copied().unwrap_or_default();
                    if !self.schema.allows(parent_relation, &node.relation_name) {
                        warn!(
                            id = %node.id,
                            relation = %node.relation_name,
                            parent_relation = %parent_relation,
                            "Relation not declared in join schema"
                        );
                    }
                }
            }
        }
    }

    fn root_lock(&self, root: &str) -> Arc<AsyncMutex<()>> {
        self.root_locks.entry(root.to_string()).or_default().clone()
    }

    fn release_root(&self, root: &str) {
        self.root_locks.remove_if(root, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Consume `feed` until `shutdown` flips to true (or its sender is dropped)
    /// or the feed closes, then wait for in-flight events.
    pub async fn run<F>(self: Arc<Self>, feed: Arc<F>, mut shutdown: watch::Receiver<bool>)
    where
        F: ChangeFeed + ?Sized + 'static,
    {
        self.state.send_replace(DispatcherState::Running);
        info!(index = %self.index.name(), concurrency = self.concurrency, "Dispatcher running");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let backoff = RetryConfig::daemon();
        let mut delay = backoff.initial_delay;
        let mut tasks = JoinSet::new();

        'consume: loop {
            if *shutdown.borrow() {
                break;
            }
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Event task panicked");
                }
            }

            let batch = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                batch = feed.next_batch() => batch,
            };

            let deliveries = match batch {
                Ok(deliveries) => {
                    delay = backoff.initial_delay;
                    deliveries
                }
                Err(FeedError::Closed) => {
                    info!("Change feed closed");
                    break;
                }
                Err(e) => {
                    crate::metrics::record_feed_error("read");
                    warn!(error = %e, next_retry = ?delay, "Change feed read failed");
                    tokio::select! {
                        biased;
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = backoff.next_delay(delay);
                    continue;
                }
            };

            for delivery in deliveries {
                let decoded = ChangeEvent::decode(&delivery.fields);
                let root = decoded
                    .as_ref()
                    .ok()
                    .and_then(|event| event.document.object_id())
                    .unwrap_or_default()
                    .to_string();

                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break 'consume;
                };
                // Taken here, in delivery order, so one root's events stay ordered
                let guard = self.root_lock(&root).lock_owned().await;

                let this = self.clone();
                let feed = feed.clone();
                tasks.spawn(async move {
                    this.process(feed.as_ref(), &delivery.id, decoded).await;
                    drop(guard);
                    this.release_root(&root);
                    drop(permit);
                });
            }
        }

        self.state.send_replace(DispatcherState::Draining);
        info!(in_flight = tasks.len(), "Dispatcher draining");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Event task panicked");
            }
        }
        self.state.send_replace(DispatcherState::Stopped);
        info!("Dispatcher stopped");
    }

    /// Handle one delivery and ack it unless the index failed.
    async fn process<F>(&self, feed: &F, delivery_id: &str, decoded: Result<ChangeEvent, FeedError>)
    where
        F: ChangeFeed + ?Sized,
    {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        crate::metrics::set_in_flight(in_flight);

        match self.handle_decoded(delivery_id, decoded).await {
            Ok(outcome) => {
                debug!(delivery = %delivery_id, outcome = ?outcome, "Event applied");
                if let Err(e) = feed.ack(delivery_id).await {
                    crate::metrics::record_feed_error("ack");
                    warn!(delivery = %delivery_id, error = %e, "Ack failed, event will be redelivered");
                }
            }
            Err(e) => {
                error!(delivery = %delivery_id, error = %e, "Event failed, leaving it for redelivery");
            }
        }

        let in_flight = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        crate::metrics::set_in_flight(in_flight);
    }
}
