//! # Plan Sync Engine
//!
//! Stores hierarchical plan documents and keeps a parent/child search index
//! consistent with them through an at-least-once change feed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PlanService                          │
//! │  • create / get / patch / delete                           │
//! │  • VersionTag stamping, If-Match / If-None-Match           │
//! │  • Merge-patch by objectId                                 │
//! └─────────────────────────────────────────────────────────────┘
//!            │ set / delete                  │ SAVE / DELETE
//!            ▼                               ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │  DocumentStore (Redis)   │   │  Change feed (Redis Streams) │
//! │  plan_<objectId> → JSON  │   │  consumer group, XACK        │
//! └──────────────────────────┘   └──────────────────────────────┘
//!                                                │
//!                                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                           │
//! │  • One-time index + join mapping bootstrap                 │
//! │  • SAVE: flatten tree → upsert every node (routed by root) │
//! │  • DELETE: collect every objectId → delete                 │
//! │  • Per-root ordering, bounded concurrency                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              SearchIndex (Elasticsearch-compatible)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use plan_sync_engine::{
//!     ChangeFeed, Dispatcher, Document, InMemoryFeed, InMemoryIndex, InMemoryStore,
//!     JoinSchema, PlanService,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(InMemoryStore::new());
//! let feed = Arc::new(InMemoryFeed::new());
//! let index = Arc::new(InMemoryIndex::default());
//!
//! let service = PlanService::new(store, feed.clone());
//! let plan = Document::try_from(json!({
//!     "objectType": "plan",
//!     "objectId": "p1",
//!     "planCostShares": {"objectType": "membercostshare", "objectId": "c1", "copay": 23}
//! })).unwrap();
//! service.create(plan).await.unwrap();
//!
//! let dispatcher = Dispatcher::new(index.clone(), JoinSchema::plan());
//! for delivery in feed.next_batch().await.unwrap() {
//!     dispatcher.handle(&delivery).await.unwrap();
//! }
//! assert_eq!(index.ids(), vec!["c1", "p1"]);
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`document`]: `Document` tree and `StoreKey`
//! - [`version`]: content version tags
//! - [`merge`]: merge-patch by identity
//! - [`flatten`]: tree → index nodes, id collection
//! - [`join`]: parent/child relation schema
//! - [`storage`]: document store backends (Redis, memory)
//! - [`feed`]: change feed backends (Redis Streams, memory)
//! - [`index`]: search index backends (HTTP, memory)
//! - [`dispatcher`]: feed consumer applying events to the index
//! - [`service`]: document access layer
//! - [`resilience`]: retry with backoff

pub mod config;
pub mod document;
pub mod version;
pub mod merge;
pub mod flatten;
pub mod join;
pub mod storage;
pub mod feed;
pub mod index;
pub mod dispatcher;
pub mod service;
pub mod resilience;
pub mod metrics;

pub use config::PlanSyncConfig;
pub use document::{Document, DocumentError, Node, Scalar, StoreKey};
pub use version::VersionTag;
pub use merge::{merge, merged, MergeSummary};
pub use flatten::{collect_ids, flatten, FlattenError, IndexNode};
pub use join::JoinSchema;
pub use storage::{DocumentStore, StorageError};
pub use storage::memory::InMemoryStore;
pub use storage::redis::RedisStore;
pub use feed::{ChangeEvent, ChangeFeed, ChangePublisher, Delivery, EventFields, FeedError, InMemoryFeed, Operation, RedisStreamFeed};
pub use index::{CreateOutcome, DeleteOutcome, ElasticIndex, IndexError, InMemoryIndex, SearchIndex};
pub use dispatcher::{Dispatcher, DispatcherState, EventOutcome, SyncError};
pub use service::{GetOutcome, PlanService, ServiceError};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
