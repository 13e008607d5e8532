// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Streams change feed.
//!
//! Producers `XADD` with an approximate `MAXLEN`. Consumers read through a
//! consumer group, so several indexers share one stream and each entry is
//! delivered to one of them:
//!
//! ```text
//! XGROUP CREATE plan-sync:changes plan-indexer $ MKSTREAM
//! XREADGROUP GROUP plan-indexer indexer-1 COUNT 32 STREAMS plan-sync:changes 0      # own backlog
//! XREADGROUP GROUP plan-indexer indexer-1 COUNT 32 BLOCK 5000 STREAMS plan-sync:changes >
//! XAUTOCLAIM plan-sync:changes plan-indexer indexer-1 60000 0-0 COUNT 32          # idle entries
//! XACK plan-sync:changes plan-indexer 1735776000000-0
//! ```
//!
//! On start the consumer first walks its own pending entries (delivered before
//! a crash, never acked), then switches to new entries. Every `claim_interval`
//! it also claims entries that sat unacked for `claim_min_idle`, whichever
//! consumer holds them. That covers events whose indexing failed while the
//! worker kept running, and entries left behind by consumers that never return.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisError};
use redis::streams::{StreamAutoClaimOptions, StreamAutoClaimReply};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PlanSyncConfig;
use crate::resilience::retry::{retry, RetryConfig};
use super::{
    ChangeEvent, ChangeFeed, ChangePublisher, Delivery, EventFields, FeedError, FIELD_BODY,
    FIELD_OPERATION,
};

/// Stream, group and read tuning for one consumer.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub stream_key: String,
    pub maxlen: usize,
    pub group: String,
    pub consumer: String,
    pub block: Duration,
    pub count: usize,
    pub compress_threshold: usize,
    pub claim_min_idle: Duration,
    pub claim_interval: Duration,
}

impl StreamSettings {
    #[must_use]
    pub fn from_config(config: &PlanSyncConfig) -> Self {
        Self {
            stream_key: config.stream_key.clone(),
            maxlen: config.stream_maxlen,
            group: config.consumer_group.clone(),
            consumer: config.consumer_name.clone(),
            block: config.read_block(),
            count: config.read_count.max(1),
            compress_threshold: config.compress_threshold_bytes,
            claim_min_idle: config.claim_min_idle(),
            claim_interval: config.claim_interval(),
        }
    }
}

pub struct RedisStreamFeed {
    /// Blocking reads only, so acks and publishes never queue behind a BLOCK
    reader: ConnectionManager,
    writer: ConnectionManager,
    settings: StreamSettings,
    /// Last pending id handed out while walking the backlog; `None` once live
    backlog_cursor: AsyncMutex<Option<String>>,
    claim: AsyncMutex<ClaimState>,
}

/// Progress of the XAUTOCLAIM sweep over the group's pending list.
struct ClaimState {
    cursor: String,
    /// When the last full sweep finished; `None` before the first one
    swept_at: Option<Instant>,
}

impl ClaimState {
    fn due(&self, interval: Duration) -> bool {
        self.cursor != CLAIM_START || self.swept_at.map_or(true, |at| at.elapsed() >= interval)
    }
}

const CLAIM_START: &str = "0-0";

fn backend(e: RedisError) -> FeedError {
    FeedError::Backend(e.to_string())
}

impl RedisStreamFeed {
    /// Connect and make sure the consumer group exists.
    pub async fn connect(connection_string: &str, settings: StreamSettings) -> Result<Self, FeedError> {
        let client = Client::open(connection_string).map_err(backend)?;

        let reader = retry("redis_stream_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(backend)?;
        let writer = retry("redis_stream_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(backend)?;

        let feed = Self::from_connections(reader, writer, settings);
        feed.ensure_group().await?;
        Ok(feed)
    }

    /// Wrap existing connections. The caller must run [`Self::ensure_group`]
    /// before consuming.
    #[must_use]
    pub fn from_connections(reader: ConnectionManager, writer: ConnectionManager, settings: StreamSettings) -> Self {
        Self {
            reader,
            writer,
            settings,
            backlog_cursor: AsyncMutex::new(Some("0".to_string())),
            claim: AsyncMutex::new(ClaimState { cursor: CLAIM_START.to_string(), swept_at: None }),
        }
    }

    /// `XGROUP CREATE .. $ MKSTREAM`; an existing group is fine.
    pub async fn ensure_group(&self) -> Result<(), FeedError> {
        let mut conn = self.writer.clone();
        let created: Result<(), RedisError> = conn
            .xgroup_create_mkstream(&self.settings.stream_key, &self.settings.group, "$")
            .await;

        match created {
            Ok(()) => {
                info!(stream = %self.settings.stream_key, group = %self.settings.group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(group = %self.settings.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(backend(e)),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    async fn read(&self, id: &str, block: Option<Duration>) -> Result<Vec<Delivery>, FeedError> {
        let mut options = StreamReadOptions::default()
            .group(&self.settings.group, &self.settings.consumer)
            .count(self.settings.count);
        if let Some(block) = block {
            options = options.block(block.as_millis() as usize);
        }

        let mut conn = self.reader.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.settings.stream_key], &[id], &options)
            .await
            .map_err(backend)?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).map(to_delivery).collect())
            .unwrap_or_default())
    }

    /// Claim entries idle for `claim_min_idle`, continuing the sweep where the
    /// last call stopped. Returns nothing when no sweep is due.
    pub async fn claim_idle(&self) -> Result<Vec<Delivery>, FeedError> {
        let mut state = self.claim.lock().await;
        if !state.due(self.settings.claim_interval) {
            return Ok(Vec::new());
        }

        let options = StreamAutoClaimOptions::default().count(self.settings.count);
        let mut conn = self.reader.clone();
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.settings.stream_key,
                &self.settings.group,
                &self.settings.consumer,
                self.settings.claim_min_idle.as_millis() as u64,
                &state.cursor,
                options,
            )
            .await
            .map_err(backend)?;

        if !reply.deleted_ids.is_empty() {
            warn!(count = reply.deleted_ids.len(), "Pending entries were trimmed before they were acked");
        }
        if reply.next_stream_id == CLAIM_START {
            state.swept_at = Some(Instant::now());
        }
        state.cursor = reply.next_stream_id;

        if !reply.claimed.is_empty() {
            info!(count = reply.claimed.len(), consumer = %self.settings.consumer, "Claimed idle entries");
            crate::metrics::record_claimed(reply.claimed.len());
        }
        Ok(reply.claimed.into_iter().map(to_delivery).collect())
    }
}

fn to_delivery(entry: StreamId) -> Delivery {
    let fields = EventFields {
        operation: entry.get::<String>(FIELD_OPERATION),
        body: entry.get::<Vec<u8>>(FIELD_BODY),
    };
    Delivery { id: entry.id, fields }
}

#[async_trait]
impl ChangePublisher for RedisStreamFeed {
    async fn publish(&self, event: &ChangeEvent) -> Result<String, FeedError> {
        let pairs = event.encode(self.settings.compress_threshold).to_pairs();
        let conn = self.writer.clone();
        let key = self.settings.stream_key.clone();
        let maxlen = self.settings.maxlen;

        retry("redis_xadd", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            let pairs = pairs.clone();
            async move {
                let id: String = conn.xadd_maxlen(&key, StreamMaxlen::Approx(maxlen), "*", &pairs).await?;
                Ok::<_, RedisError>(id)
            }
        })
        .await
        .map_err(backend)
    }
}

#[async_trait]
impl ChangeFeed for RedisStreamFeed {
    async fn next_batch(&self) -> Result<Vec<Delivery>, FeedError> {
        let mut cursor = self.backlog_cursor.lock().await;

        if let Some(from) = cursor.clone() {
            let backlog = self.read(&from, None).await?;
            match backlog.last() {
                Some(last) => {
                    debug!(count = backlog.len(), "Redelivering pending entries");
                    *cursor = Some(last.id.clone());
                    return Ok(backlog);
                }
                None => {
                    info!(consumer = %self.settings.consumer, "Pending backlog drained, reading new entries");
                    *cursor = None;
                }
            }
        }
        drop(cursor);

        let claimed = self.claim_idle().await?;
        if !claimed.is_empty() {
            return Ok(claimed);
        }

        self.read(">", Some(self.settings.block)).await
    }

    async fn ack(&self, id: &str) -> Result<(), FeedError> {
        let conn = self.writer.clone();
        let key = self.settings.stream_key.clone();
        let group = self.settings.group.clone();
        let id = id.to_string();

        retry("redis_xack", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let (key, group, id) = (key.clone(), group.clone(), id.clone());
            async move {
                let _: u64 = conn.xack(&key, &group, &[&id]).await?;
                Ok::<_, RedisError>(())
            }
        })
        .await
        .map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = PlanSyncConfig {
            stream_key: "changes".into(),
            consumer_name: "indexer-a".into(),
            read_count: 0,
            read_block_ms: 100,
            ..Default::default()
        };
        let settings = StreamSettings::from_config(&config);
        assert_eq!(settings.stream_key, "changes");
        assert_eq!(settings.consumer, "indexer-a");
        assert_eq!(settings.group, "plan-indexer");
        assert_eq!(settings.count, 1);
        assert_eq!(settings.block, Duration::from_millis(100));
        assert_eq!(settings.claim_min_idle, Duration::from_secs(60));
        assert_eq!(settings.claim_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_claim_due_on_first_call_and_mid_sweep() {
        let interval = Duration::from_secs(10);
        let fresh = ClaimState { cursor: CLAIM_START.to_string(), swept_at: None };
        assert!(fresh.due(interval));

        let swept = ClaimState { cursor: CLAIM_START.to_string(), swept_at: Some(Instant::now()) };
        assert!(!swept.due(interval));
        assert!(swept.due(Duration::ZERO));

        // A sweep that stopped halfway continues on the next read
        let partial = ClaimState { cursor: "1735776000000-3".to_string(), swept_at: Some(Instant::now()) };
        assert!(partial.due(interval));
    }
}
