// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change feed between the plan service and the indexer.
//!
//! # Wire Format
//!
//! ```text
//! XADD plan-sync:changes MAXLEN ~ 100000 *
//!   operation  "SAVE"                 # or "DELETE", any case
//!   body       <json | zstd(json)>    # full document tree
//! ```
//!
//! Bodies above the publisher's threshold are zstd-compressed. Readers detect
//! compression by the zstd magic bytes, so uncompressed producers interoperate.
//!
//! Delivery is at-least-once: a delivery stays pending until acked, and
//! unacked deliveries are handed out again after a consumer restart.

pub mod memory;
pub mod redis_stream;

use std::fmt;
use std::io::Read;

use async_trait::async_trait;
use thiserror::Error;

use crate::document::Document;

pub use memory::InMemoryFeed;
pub use redis_stream::RedisStreamFeed;

/// zstd magic bytes: 0x28 0xB5 0x2F 0xFD
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

pub const FIELD_OPERATION: &str = "operation";
pub const FIELD_BODY: &str = "body";

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Malformed change event: {0}")]
    Malformed(String),
    #[error("Change feed backend error: {0}")]
    Backend(String),
    #[error("Change feed closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Save,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Save => "SAVE",
            Operation::Delete => "DELETE",
        }
    }

    /// Lowercase name for metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Save => "save",
            Operation::Delete => "delete",
        }
    }

    /// Case-insensitive parse of the wire name.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("save") {
            Some(Operation::Save)
        } else if raw.eq_ignore_ascii_case("delete") {
            Some(Operation::Delete)
        } else {
            None
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw fields of one feed entry, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFields {
    pub operation: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl EventFields {
    /// Field/value pairs for XADD.
    pub fn to_pairs(&self) -> Vec<(&'static str, Vec<u8>)> {
        let mut pairs = Vec::with_capacity(2);
        if let Some(ref op) = self.operation {
            pairs.push((FIELD_OPERATION, op.as_bytes().to_vec()));
        }
        if let Some(ref body) = self.body {
            pairs.push((FIELD_BODY, body.clone()));
        }
        pairs
    }
}

/// A validated change event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub document: Document,
}

impl ChangeEvent {
    pub fn save(document: Document) -> Self {
        Self { operation: Operation::Save, document }
    }

    pub fn delete(document: Document) -> Self {
        Self { operation: Operation::Delete, document }
    }

    /// Encode for the wire, compressing bodies of at least `compress_threshold`
    /// bytes (0 disables compression).
    pub fn encode(&self, compress_threshold: usize) -> EventFields {
        let json = self.document.to_json_string().into_bytes();
        let body = if compress_threshold > 0 && json.len() >= compress_threshold {
            maybe_compress(&json)
        } else {
            json
        };
        EventFields {
            operation: Some(self.operation.as_str().to_string()),
            body: Some(body),
        }
    }

    /// Validate raw fields. Every failure is [`FeedError::Malformed`].
    pub fn decode(fields: &EventFields) -> Result<Self, FeedError> {
        let raw_op = fields
            .operation
            .as_deref()
            .ok_or_else(|| FeedError::Malformed("missing operation".into()))?;
        let operation = Operation::parse(raw_op)
            .ok_or_else(|| FeedError::Malformed(format!("unknown operation '{}'", raw_op)))?;

        let raw_body = fields
            .body
            .as_deref()
            .ok_or_else(|| FeedError::Malformed("missing body".into()))?;
        let body = maybe_decompress(raw_body)
            .map_err(|e| FeedError::Malformed(format!("undecodable body: {}", e)))?;
        let document = Document::from_json_slice(&body)
            .map_err(|e| FeedError::Malformed(e.to_string()))?;

        Ok(Self { operation, document })
    }
}

/// One entry handed to a consumer. `id` is what gets acked.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub fields: EventFields,
}

/// Producer side of the feed.
#[async_trait]
pub trait ChangePublisher: Send + Sync {
    /// Append an event; returns the assigned delivery id.
    async fn publish(&self, event: &ChangeEvent) -> Result<String, FeedError>;
}

/// Consumer side of the feed.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Next batch of deliveries. Empty means nothing arrived before the read
    /// timeout; `Err(FeedError::Closed)` means the feed will never yield again.
    async fn next_batch(&self) -> Result<Vec<Delivery>, FeedError>;

    /// Mark a delivery processed so it is not redelivered.
    async fn ack(&self, id: &str) -> Result<(), FeedError>;
}

/// Compress data with zstd, unless it's already zstd-compressed.
///
/// Returns the original data if compression fails or does not shrink it.
pub fn maybe_compress(data: &[u8]) -> Vec<u8> {
    if is_zstd_compressed(data) {
        return data.to_vec();
    }

    match zstd::encode_all(data, 3) {
        Ok(compressed) if compressed.len() < data.len() => compressed,
        _ => data.to_vec(),
    }
}

/// Decompress zstd data if it has the magic header, otherwise return as-is.
pub fn maybe_decompress(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    if is_zstd_compressed(data) {
        let mut decoder = zstd::Decoder::new(data)?;
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(decompressed)
    } else {
        Ok(data.to_vec())
    }
}

pub fn is_zstd_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan() -> Document {
        Document::try_from(json!({
            "objectType": "plan",
            "objectId": "p1",
            "planType": "inNetwork",
            "linkedPlanServices": [
                {"objectType": "planservice", "objectId": "s1", "note": "x".repeat(200)},
                {"objectType": "planservice", "objectId": "s2", "note": "y".repeat(200)}
            ]
        }))
        .unwrap()
    }

    fn raw(op: &str, body: &str) -> EventFields {
        EventFields {
            operation: Some(op.to_string()),
            body: Some(body.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_operation_parse_ignores_case() {
        assert_eq!(Operation::parse("SAVE"), Some(Operation::Save));
        assert_eq!(Operation::parse("save"), Some(Operation::Save));
        assert_eq!(Operation::parse(" Delete "), Some(Operation::Delete));
        assert_eq!(Operation::parse("upsert"), None);
    }

    #[test]
    fn test_encode_small_body_is_plain_json() {
        let event = ChangeEvent::save(plan());
        let fields = event.encode(1024 * 1024);
        assert_eq!(fields.operation.as_deref(), Some("SAVE"));
        let body = fields.body.clone().unwrap();
        assert!(!is_zstd_compressed(&body));
        assert_eq!(ChangeEvent::decode(&fields).unwrap(), event);
    }

    #[test]
    fn test_large_body_is_compressed_and_decodes() {
        let event = ChangeEvent::delete(plan());
        let fields = event.encode(64);
        assert!(is_zstd_compressed(fields.body.as_deref().unwrap()));
        assert_eq!(ChangeEvent::decode(&fields).unwrap(), event);
    }

    #[test]
    fn test_decode_accepts_lowercase_operation() {
        let event = ChangeEvent::decode(&raw("delete", r#"{"objectType":"plan","objectId":"p1"}"#)).unwrap();
        assert_eq!(event.operation, Operation::Delete);
        assert_eq!(event.document.object_id(), Some("p1"));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let cases = vec![
            EventFields { operation: None, body: Some(b"{}".to_vec()) },
            EventFields { operation: Some("SAVE".into()), body: None },
            raw("PURGE", "{}"),
            raw("SAVE", "{not json"),
            raw("SAVE", "[1,2,3]"),
        ];
        for fields in cases {
            assert!(
                matches!(ChangeEvent::decode(&fields), Err(FeedError::Malformed(_))),
                "expected malformed: {:?}",
                fields
            );
        }
    }

    #[test]
    fn test_maybe_compress_skips_already_zstd() {
        let mut fake_zstd = ZSTD_MAGIC.to_vec();
        fake_zstd.extend_from_slice(b"already compressed data");
        assert_eq!(maybe_compress(&fake_zstd), fake_zstd);
    }

    #[test]
    fn test_corrupt_zstd_body_is_malformed() {
        let mut body = ZSTD_MAGIC.to_vec();
        body.extend_from_slice(b"garbage");
        let fields = EventFields { operation: Some("SAVE".into()), body: Some(body) };
        assert!(matches!(ChangeEvent::decode(&fields), Err(FeedError::Malformed(_))));
    }

    #[test]
    fn test_to_pairs_skips_missing_fields() {
        let fields = EventFields { operation: Some("SAVE".into()), body: None };
        let pairs = fields.to_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, FIELD_OPERATION);
    }
}
