// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the plan sync engine.
//!
//! # Example
//!
//! ```
//! use plan_sync_engine::PlanSyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = PlanSyncConfig::default();
//! assert_eq!(config.index_name, "plan-index");
//! assert_eq!(config.join_field, "plan_join");
//!
//! // Partial TOML, everything else defaulted
//! let config = PlanSyncConfig::from_toml_str(r#"
//!     redis_url = "redis://cache:6379"
//!     worker_concurrency = 8
//! "#).unwrap();
//! assert_eq!(config.worker_concurrency, 8);
//! assert_eq!(config.stream_key, "plan-sync:changes");
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the plan store, change feed and indexer.
///
/// Every field has a default, so an empty file is a valid config pointing at
/// local Redis and Elasticsearch.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanSyncConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Key prefix for stored documents (e.g., "myapp:")
    #[serde(default)]
    pub redis_prefix: Option<String>,

    /// Search index base URL
    #[serde(default = "default_index_url")]
    pub index_url: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_join_field")]
    pub join_field: String,
    #[serde(default = "default_index_shards")]
    pub index_shards: u32,
    #[serde(default = "default_index_replicas")]
    pub index_replicas: u32,
    /// Basic auth for the search index
    #[serde(default)]
    pub index_username: Option<String>,
    #[serde(default)]
    pub index_password: Option<String>,
    #[serde(default = "default_index_connect_timeout_ms")]
    pub index_connect_timeout_ms: u64,
    #[serde(default = "default_index_request_timeout_ms")]
    pub index_request_timeout_ms: u64,

    /// Change feed stream settings
    #[serde(default = "default_stream_key")]
    pub stream_key: String,
    /// Approximate stream cap (XADD MAXLEN ~)
    #[serde(default = "default_stream_maxlen")]
    pub stream_maxlen: usize,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Must stay the same across restarts so the consumer finds its own
    /// pending entries. Defaults to `indexer-$HOSTNAME`.
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    #[serde(default = "default_read_block_ms")]
    pub read_block_ms: u64,
    #[serde(default = "default_read_count")]
    pub read_count: usize,
    /// Entries unacked this long are claimed from any consumer (XAUTOCLAIM)
    #[serde(default = "default_claim_min_idle_ms")]
    pub claim_min_idle_ms: u64,
    /// How often the consumer looks for idle entries to claim
    #[serde(default = "default_claim_interval_ms")]
    pub claim_interval_ms: u64,
    /// Compress event bodies above this size (0 = never)
    #[serde(default = "default_compress_threshold_bytes")]
    pub compress_threshold_bytes: usize,

    /// Events processed in parallel (different roots only)
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// objectType accepted by the write service
    #[serde(default = "default_root_object_type")]
    pub root_object_type: String,
}

fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_index_url() -> String { "http://127.0.0.1:9200".to_string() }
fn default_index_name() -> String { "plan-index".to_string() }
fn default_join_field() -> String { "plan_join".to_string() }
fn default_index_shards() -> u32 { 1 }
fn default_index_replicas() -> u32 { 1 }
fn default_index_connect_timeout_ms() -> u64 { 5_000 }
fn default_index_request_timeout_ms() -> u64 { 30_000 }
fn default_stream_key() -> String { "plan-sync:changes".to_string() }
fn default_stream_maxlen() -> usize { 100_000 }
fn default_consumer_group() -> String { "plan-indexer".to_string() }
fn default_consumer_name() -> String {
    match std::env::var("HOSTNAME") {
        Ok(host) if !host.trim().is_empty() => format!("indexer-{}", host.trim()),
        _ => "indexer".to_string(),
    }
}
fn default_read_block_ms() -> u64 { 5_000 }
fn default_read_count() -> usize { 32 }
fn default_claim_min_idle_ms() -> u64 { 60_000 }
fn default_claim_interval_ms() -> u64 { 10_000 }
fn default_compress_threshold_bytes() -> usize { 4 * 1024 }
fn default_worker_concurrency() -> usize { 4 }
fn default_root_object_type() -> String { "plan".to_string() }

impl Default for PlanSyncConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            redis_prefix: None,
            index_url: default_index_url(),
            index_name: default_index_name(),
            join_field: default_join_field(),
            index_shards: default_index_shards(),
            index_replicas: default_index_replicas(),
            index_username: None,
            index_password: None,
            index_connect_timeout_ms: default_index_connect_timeout_ms(),
            index_request_timeout_ms: default_index_request_timeout_ms(),
            stream_key: default_stream_key(),
            stream_maxlen: default_stream_maxlen(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            read_block_ms: default_read_block_ms(),
            read_count: default_read_count(),
            claim_min_idle_ms: default_claim_min_idle_ms(),
            claim_interval_ms: default_claim_interval_ms(),
            compress_threshold_bytes: default_compress_threshold_bytes(),
            worker_concurrency: default_worker_concurrency(),
            root_object_type: default_root_object_type(),
        }
    }
}

impl PlanSyncConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    #[must_use]
    pub fn index_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.index_connect_timeout_ms)
    }

    #[must_use]
    pub fn index_request_timeout(&self) -> Duration {
        Duration::from_millis(self.index_request_timeout_ms)
    }

    #[must_use]
    pub fn read_block(&self) -> Duration {
        Duration::from_millis(self.read_block_ms)
    }

    #[must_use]
    pub fn claim_min_idle(&self) -> Duration {
        Duration::from_millis(self.claim_min_idle_ms)
    }

    #[must_use]
    pub fn claim_interval(&self) -> Duration {
        Duration::from_millis(self.claim_interval_ms)
    }
}
