//! Integration Tests for Plan Sync Engine
//!
//! End-to-end runs of the write path (service → store → feed) and the read
//! path (feed → dispatcher → index). In-memory tests always run; tests
//! against a real Redis use testcontainers, no external docker-compose
//! required.
//!
//! # Running Tests
//! ```bash
//! # In-memory pipeline tests
//! cargo test --test integration
//!
//! # Redis-backed tests (requires Docker)
//! cargo test --test integration -- --ignored
//! ```
//!
//! # Test Organization
//! - `pipeline_*` - service, in-memory feed, dispatcher and index together
//! - `redis_*` - RedisStore and RedisStreamFeed against a container

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;

use plan_sync_engine::feed::redis_stream::StreamSettings;
use plan_sync_engine::{
    ChangeEvent, ChangeFeed, ChangePublisher, Dispatcher, DispatcherState, Document, DocumentStore,
    GetOutcome, InMemoryFeed, InMemoryIndex, InMemoryStore, JoinSchema, Operation, PlanService,
    PlanSyncConfig, RedisStore, RedisStreamFeed, ServiceError, StoreKey,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn doc(value: Value) -> Document {
    Document::try_from(value).unwrap()
}

fn plan() -> Document {
    doc(json!({
        "_org": "example.com",
        "objectType": "plan",
        "objectId": "12xvxc345ssdsds-508",
        "planType": "inNetwork",
        "creationDate": "12-12-2017",
        "planCostShares": {
            "_org": "example.com",
            "objectType": "membercostshare",
            "objectId": "1234vxc2324sdf-501",
            "deductible": 2000,
            "copay": 23
        },
        "linkedPlanServices": [
            {
                "_org": "example.com",
                "objectType": "planservice",
                "objectId": "27283xvx9asdff-504",
                "linkedService": {
                    "_org": "example.com",
                    "objectType": "service",
                    "objectId": "1234520xvc30asdf-502",
                    "name": "Yearly physical"
                },
                "planserviceCostShares": {
                    "_org": "example.com",
                    "objectType": "membercostshare",
                    "objectId": "1234512xvc1314asdfs-503",
                    "deductible": 10,
                    "copay": 0
                }
            },
            {
                "_org": "example.com",
                "objectType": "planservice",
                "objectId": "27283xvx9sdf-507",
                "linkedService": {
                    "_org": "example.com",
                    "objectType": "service",
                    "objectId": "1234520xvc30sfs-505",
                    "name": "well baby"
                },
                "planserviceCostShares": {
                    "_org": "example.com",
                    "objectType": "membercostshare",
                    "objectId": "1234512xvc1314sdfsd-506",
                    "deductible": 10,
                    "copay": 175
                }
            }
        ]
    }))
}

const PLAN_ID: &str = "12xvxc345ssdsds-508";

fn plan_ids() -> Vec<String> {
    let mut ids: Vec<String> = [
        PLAN_ID,
        "1234vxc2324sdf-501",
        "27283xvx9asdff-504",
        "1234520xvc30asdf-502",
        "1234512xvc1314asdfs-503",
        "27283xvx9sdf-507",
        "1234520xvc30sfs-505",
        "1234512xvc1314sdfsd-506",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    ids.sort();
    ids
}

/// Drain everything currently queued on an in-memory feed through the dispatcher.
async fn drain(dispatcher: &Dispatcher, feed: &InMemoryFeed) {
    loop {
        let batch = feed.next_batch().await.unwrap();
        if batch.is_empty() {
            break;
        }
        for delivery in batch {
            dispatcher.handle(&delivery).await.unwrap();
            feed.ack(&delivery.id).await.unwrap();
        }
    }
}

fn tag_of(outcome: &GetOutcome) -> String {
    match outcome {
        GetOutcome::Found { tag, .. } | GetOutcome::NotModified { tag } => tag.header_value(),
    }
}

// =============================================================================
// Pipeline Tests - in-memory backends
// =============================================================================

#[tokio::test]
async fn pipeline_create_indexes_every_node() {
    let store = Arc::new(InMemoryStore::new());
    let feed = Arc::new(InMemoryFeed::new());
    let index = Arc::new(InMemoryIndex::default());
    let service = PlanService::new(store.clone(), feed.clone());
    let dispatcher = Dispatcher::new(index.clone(), JoinSchema::plan());

    service.create(plan()).await.unwrap();
    drain(&dispatcher, &feed).await;

    assert_eq!(index.ids(), plan_ids());
    assert!(feed.pending_ids().is_empty());

    // Every node routes by the plan, children point at their parent
    let root = index.get(PLAN_ID).unwrap();
    assert_eq!(root.routing, PLAN_ID);
    assert_eq!(root.source["plan_join"], json!("plan"));

    let service_node = index.get("1234520xvc30asdf-502").unwrap();
    assert_eq!(service_node.routing, PLAN_ID);
    assert_eq!(service_node.source["plan_join"]["name"], json!("linkedService"));
    assert_eq!(service_node.source["plan_join"]["parent"], json!("27283xvx9asdff-504"));
    assert_eq!(service_node.source["name"], json!("Yearly physical"));

    // Nested objects are not copied into the parent's fields
    assert!(root.source.get("planCostShares").is_none());
    assert_eq!(root.source["planType"], json!("inNetwork"));
}

#[tokio::test]
async fn pipeline_patch_adds_nodes_and_keeps_old_ones() {
    let store = Arc::new(InMemoryStore::new());
    let feed = Arc::new(InMemoryFeed::new());
    let index = Arc::new(InMemoryIndex::default());
    let service = PlanService::new(store.clone(), feed.clone());
    let dispatcher = Dispatcher::new(index.clone(), JoinSchema::plan());

    let tag = service.create(plan()).await.unwrap();
    drain(&dispatcher, &feed).await;

    let update = doc(json!({
        "planType": "outOfNetwork",
        "linkedPlanServices": [
            {
                "objectType": "planservice",
                "objectId": "27283xvx9asdff-504",
                "planserviceCostShares": {
                    "objectType": "membercostshare",
                    "objectId": "1234512xvc1314asdfs-503",
                    "copay": 5
                }
            },
            {
                "_org": "example.com",
                "objectType": "planservice",
                "objectId": "new-service-600",
                "linkedService": {"objectType": "service", "objectId": "new-601", "name": "dental"}
            }
        ]
    }));
    let (merged, new_tag) = service
        .patch(PLAN_ID, update, Some(tag.header_value().as_str()))
        .await
        .unwrap();
    assert_ne!(new_tag, tag);
    assert_eq!(merged.get("linkedPlanServices").unwrap().as_sequence().unwrap().len(), 3);
    drain(&dispatcher, &feed).await;

    let mut expected = plan_ids();
    expected.extend(["new-service-600".to_string(), "new-601".to_string()]);
    expected.sort();
    assert_eq!(index.ids(), expected);

    assert_eq!(index.get(PLAN_ID).unwrap().source["planType"], json!("outOfNetwork"));
    let cost = index.get("1234512xvc1314asdfs-503").unwrap();
    assert_eq!(cost.source["copay"], json!(5));
    assert_eq!(cost.source["deductible"], json!(10));
}

#[tokio::test]
async fn pipeline_delete_removes_every_node() {
    let store = Arc::new(InMemoryStore::new());
    let feed = Arc::new(InMemoryFeed::new());
    let index = Arc::new(InMemoryIndex::default());
    let service = PlanService::new(store.clone(), feed.clone());
    let dispatcher = Dispatcher::new(index.clone(), JoinSchema::plan());

    service.create(plan()).await.unwrap();
    service
        .create(doc(json!({"objectType": "plan", "objectId": "other", "planType": "x"})))
        .await
        .unwrap();
    drain(&dispatcher, &feed).await;
    assert_eq!(index.len(), 9);

    service.delete(PLAN_ID).await.unwrap();
    drain(&dispatcher, &feed).await;

    assert_eq!(index.ids(), vec!["other"]);
    assert!(store.get(&StoreKey::new("plan", PLAN_ID)).await.unwrap().is_none());
    assert!(matches!(service.get(PLAN_ID, None).await, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn pipeline_conditional_requests() {
    let store = Arc::new(InMemoryStore::new());
    let feed = Arc::new(InMemoryFeed::new());
    let service = PlanService::new(store, feed.clone());

    service.create(plan()).await.unwrap();
    let found = service.get(PLAN_ID, None).await.unwrap();
    let tag = tag_of(&found);

    let not_modified = service.get(PLAN_ID, Some(tag.as_str())).await.unwrap();
    assert!(matches!(not_modified, GetOutcome::NotModified { .. }));

    // Stale tag is refused and nothing is published
    let stale = service
        .patch(PLAN_ID, doc(json!({"planType": "x"})), Some("\"stale\""))
        .await;
    assert!(matches!(stale, Err(ServiceError::PreconditionFailed { .. })));
    assert_eq!(stale.unwrap_err().status_code(), 412);
    let published = feed.next_batch().await.unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(ChangeEvent::decode(&published[0].fields).unwrap().operation, Operation::Save);

    service
        .patch(PLAN_ID, doc(json!({"planType": "x"})), Some(tag.as_str()))
        .await
        .unwrap();
    let refreshed = service.get(PLAN_ID, Some(tag.as_str())).await.unwrap();
    assert!(matches!(refreshed, GetOutcome::Found { .. }));
}

#[tokio::test]
async fn pipeline_runs_under_dispatcher_loop() {
    let store = Arc::new(InMemoryStore::new());
    let feed = Arc::new(InMemoryFeed::new().with_compress_threshold(256));
    let index = Arc::new(InMemoryIndex::default());
    let service = PlanService::new(store, feed.clone());
    let dispatcher = Arc::new(Dispatcher::new(index.clone(), JoinSchema::plan()).with_concurrency(4));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.clone().run(feed.clone(), rx));

    service.create(plan()).await.unwrap();
    for n in 0..5 {
        service
            .create(doc(json!({"objectType": "plan", "objectId": format!("p{}", n)})))
            .await
            .unwrap();
    }
    service.delete("p0").await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while feed.acked().len() < 7 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert_eq!(feed.acked().len(), 7);
    assert!(index.get("p0").is_none());
    assert_eq!(index.len(), plan_ids().len() + 4);
    assert_eq!(index.create_calls(), 1);
}

// =============================================================================
// Redis Tests - require Docker
// =============================================================================

fn stream_settings(config: &PlanSyncConfig, consumer: &str) -> StreamSettings {
    let mut settings = StreamSettings::from_config(config);
    settings.consumer = consumer.to_string();
    settings.block = Duration::from_millis(100);
    settings
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_store_roundtrip() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));

    let store = RedisStore::with_prefix(&url, Some("test:")).await.expect("connect");
    let key = StoreKey::new("plan", PLAN_ID);

    assert!(store.get(&key).await.unwrap().is_none());
    store.set(&key, &plan()).await.unwrap();
    assert!(store.exists(&key).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), Some(plan()));

    // Stored under the prefixed key as JSON text
    let mut conn = store.connection();
    let raw: String = redis::cmd("GET")
        .arg(format!("test:plan_{}", PLAN_ID))
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(Document::from_json_str(&raw).unwrap(), plan());

    assert!(store.delete(&key).await.unwrap());
    assert!(!store.delete(&key).await.unwrap());
    assert!(!store.exists(&key).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_store_from_config_uses_prefix() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let config = PlanSyncConfig {
        redis_url: format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379)),
        redis_prefix: Some("tenant-a:".into()),
        ..Default::default()
    };

    let store = Arc::new(RedisStore::from_config(&config).await.expect("connect"));
    assert_eq!(store.prefix(), "tenant-a:");
    let service = PlanService::from_config(store.clone(), Arc::new(InMemoryFeed::new()), &config);
    service.create(plan()).await.unwrap();

    let mut conn = store.connection();
    let exists: bool = redis::cmd("EXISTS")
        .arg(format!("tenant-a:plan_{}", PLAN_ID))
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(exists);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_stream_publish_read_ack() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));
    let config = PlanSyncConfig { compress_threshold_bytes: 512, ..Default::default() };

    let feed = RedisStreamFeed::connect(&url, stream_settings(&config, "c1")).await.expect("connect");
    // Second ensure_group hits BUSYGROUP and is fine
    feed.ensure_group().await.unwrap();

    let saved = feed.publish(&ChangeEvent::save(plan())).await.unwrap();
    feed.publish(&ChangeEvent::delete(plan())).await.unwrap();

    let mut deliveries = Vec::new();
    for _ in 0..5 {
        deliveries.extend(feed.next_batch().await.unwrap());
        if deliveries.len() >= 2 {
            break;
        }
    }
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].id, saved);

    let first = ChangeEvent::decode(&deliveries[0].fields).unwrap();
    assert_eq!(first.operation, Operation::Save);
    assert_eq!(first.document, plan());
    let second = ChangeEvent::decode(&deliveries[1].fields).unwrap();
    assert_eq!(second.operation, Operation::Delete);

    for delivery in &deliveries {
        feed.ack(&delivery.id).await.unwrap();
    }
    assert!(feed.next_batch().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_stream_redelivers_unacked_after_restart() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));
    let config = PlanSyncConfig::default();

    let first = RedisStreamFeed::connect(&url, stream_settings(&config, "indexer-a")).await.unwrap();
    first.publish(&ChangeEvent::save(plan())).await.unwrap();
    first
        .publish(&ChangeEvent::save(doc(json!({"objectType": "plan", "objectId": "p2"}))))
        .await
        .unwrap();

    let batch = first.next_batch().await.unwrap();
    assert_eq!(batch.len(), 2);
    first.ack(&batch[0].id).await.unwrap();
    let unacked = batch[1].id.clone();
    drop(first);

    // Same consumer name: its own pending entries come back first
    let restarted = RedisStreamFeed::connect(&url, stream_settings(&config, "indexer-a")).await.unwrap();
    let redelivered = restarted.next_batch().await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].id, unacked);
    restarted.ack(&unacked).await.unwrap();

    assert!(restarted.next_batch().await.unwrap().is_empty());
    assert!(restarted.next_batch().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_stream_claims_idle_entries() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));
    let config = PlanSyncConfig { claim_min_idle_ms: 200, claim_interval_ms: 0, ..Default::default() };

    let a = RedisStreamFeed::connect(&url, stream_settings(&config, "indexer-a")).await.unwrap();
    let id = a.publish(&ChangeEvent::save(plan())).await.unwrap();
    let batch = a.next_batch().await.unwrap();
    assert_eq!(batch[0].id, id);

    // Still running, entry not idle long enough: nothing comes back
    assert!(a.next_batch().await.unwrap().is_empty());

    // Once idle, the same running consumer gets it again
    tokio::time::sleep(Duration::from_millis(250)).await;
    let retried = a.next_batch().await.unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].id, id);

    // A consumer that never comes back loses the entry to another one
    drop(a);
    tokio::time::sleep(Duration::from_millis(250)).await;
    let b = RedisStreamFeed::connect(&url, stream_settings(&config, "indexer-b")).await.unwrap();
    let claimed = b.next_batch().await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(ChangeEvent::decode(&claimed[0].fields).unwrap().document, plan());

    b.ack(&id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(b.next_batch().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_full_pipeline() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = format!("redis://127.0.0.1:{}", redis.get_host_port_ipv4(6379));
    let config = PlanSyncConfig::default();

    let store = Arc::new(RedisStore::new(&url).await.unwrap());
    let feed = Arc::new(RedisStreamFeed::connect(&url, stream_settings(&config, "pipeline")).await.unwrap());
    let index = Arc::new(InMemoryIndex::default());
    let service = PlanService::new(store, feed.clone());
    let dispatcher = Arc::new(Dispatcher::new(index.clone(), JoinSchema::plan()));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.clone().run(feed.clone(), rx));

    service.create(plan()).await.unwrap();
    service
        .create(doc(json!({"objectType": "plan", "objectId": "short-lived"})))
        .await
        .unwrap();
    service.delete("short-lived").await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while (index.delete_count() == 0 || index.ids() != plan_ids()) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(index.ids(), plan_ids());
}
