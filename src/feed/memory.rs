// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process feed on a tokio channel.
//!
//! Mirrors the stream semantics the dispatcher relies on: deliveries stay
//! pending until acked, and [`InMemoryFeed::redeliver_pending`] hands every
//! unacked delivery out again (what a consumer restart does on Redis).
//! With [`InMemoryFeed::with_redelivery_after`], entries left unacked for
//! that long are handed out again by `next_batch`, like an idle claim.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use super::{ChangeEvent, ChangeFeed, ChangePublisher, Delivery, EventFields, FeedError};

struct PendingEntry {
    fields: EventFields,
    delivered_at: Instant,
}

pub struct InMemoryFeed {
    sender: Mutex<Option<UnboundedSender<Delivery>>>,
    receiver: AsyncMutex<UnboundedReceiver<Delivery>>,
    pending: DashMap<String, PendingEntry>,
    acked: Mutex<Vec<String>>,
    next_id: AtomicU64,
    batch_size: usize,
    read_timeout: Duration,
    compress_threshold: usize,
    redeliver_after: Option<Duration>,
}

impl InMemoryFeed {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: AsyncMutex::new(rx),
            pending: DashMap::new(),
            acked: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            batch_size: 16,
            read_timeout: Duration::from_millis(20),
            compress_threshold: 0,
            redeliver_after: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_compress_threshold(mut self, bytes: usize) -> Self {
        self.compress_threshold = bytes;
        self
    }

    /// Hand unacked entries out again once they have been idle this long.
    pub fn with_redelivery_after(mut self, idle: Duration) -> Self {
        self.redeliver_after = Some(idle);
        self
    }

    /// Enqueue raw fields as-is (no validation), e.g. a malformed entry.
    pub fn push_raw(&self, fields: EventFields) -> Result<String, FeedError> {
        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.send(Delivery { id: id.clone(), fields })?;
        Ok(id)
    }

    fn send(&self, delivery: Delivery) -> Result<(), FeedError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(FeedError::Closed)?;
        sender.send(delivery).map_err(|_| FeedError::Closed)
    }

    /// Hand out every delivered-but-unacked entry again.
    pub fn redeliver_pending(&self) -> Result<usize, FeedError> {
        let mut redelivered: Vec<Delivery> = self
            .pending
            .iter()
            .map(|e| Delivery { id: e.key().clone(), fields: e.value().fields.clone() })
            .collect();
        redelivered.sort_by(|a, b| a.id.cmp(&b.id));
        let count = redelivered.len();
        for delivery in redelivered {
            self.send(delivery)?;
        }
        Ok(count)
    }

    /// Stop accepting events. Readers drain what is queued, then see `Closed`.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// Ids acked so far, in ack order.
    #[must_use]
    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().clone()
    }

    /// Ids delivered but not yet acked.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Pending entries idle for at least `idle`, oldest id first. Their idle
    /// clock restarts, so each is claimed at most once per window.
    fn claim_idle(&self, idle: Duration) -> Vec<Delivery> {
        let now = Instant::now();
        let mut ids: Vec<String> = self
            .pending
            .iter()
            .filter(|e| now.duration_since(e.value().delivered_at) >= idle)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids.truncate(self.batch_size);

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut entry) = self.pending.get_mut(&id) {
                entry.delivered_at = now;
                claimed.push(Delivery { id, fields: entry.fields.clone() });
            }
        }
        claimed
    }
}

impl Default for InMemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangePublisher for InMemoryFeed {
    async fn publish(&self, event: &ChangeEvent) -> Result<String, FeedError> {
        self.push_raw(event.encode(self.compress_threshold))
    }
}

#[async_trait]
impl ChangeFeed for InMemoryFeed {
    async fn next_batch(&self) -> Result<Vec<Delivery>, FeedError> {
        let mut receiver = self.receiver.lock().await;

        if let Some(idle) = self.redeliver_after {
            let claimed = self.claim_idle(idle);
            if !claimed.is_empty() {
                return Ok(claimed);
            }
        }

        let first = match tokio::time::timeout(self.read_timeout, receiver.recv()).await {
            Err(_elapsed) => return Ok(Vec::new()),
            Ok(None) => return Err(FeedError::Closed),
            Ok(Some(delivery)) => delivery,
        };

        let mut batch = vec![first];
        while batch.len() < self.batch_size {
            match receiver.try_recv() {
                Ok(delivery) => batch.push(delivery),
                Err(_) => break,
            }
        }

        let now = Instant::now();
        for delivery in &batch {
            self.pending.insert(
                delivery.id.clone(),
                PendingEntry { fields: delivery.fields.clone(), delivered_at: now },
            );
        }
        Ok(batch)
    }

    async fn ack(&self, id: &str) -> Result<(), FeedError> {
        if self.pending.remove(id).is_some() {
            self.acked.lock().push(id.to_string());
        }
        Ok(())
    }
}
