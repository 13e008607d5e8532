// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Merge-patch engine.
//!
//! Reconciles a stored document with an incoming partial update, key by key:
//!
//! | existing        | update          | result                                  |
//! |-----------------|-----------------|-----------------------------------------|
//! | absent          | any             | insert update value                     |
//! | object          | object          | recurse                                 |
//! | sequence        | sequence        | reconcile elements by `objectId`        |
//! | anything else   | anything else   | overwrite, only if the values differ    |
//!
//! Sequence elements are matched on `objectId`: a match is merged in place
//! (position kept), an unknown id is appended. Elements missing from the
//! update are kept. Merge only ever adds or changes, it never removes, so
//! applying the same update twice is a no-op the second time.
//!
//! # Example
//!
//! ```
//! use plan_sync_engine::document::Document;
//! use plan_sync_engine::merge::merge;
//! use serde_json::json;
//!
//! let mut plan = Document::try_from(json!({
//!     "objectType": "plan", "objectId": "p1",
//!     "items": [{"objectType": "item", "objectId": "i1", "qty": 1}]
//! })).unwrap();
//! let update = Document::try_from(json!({
//!     "items": [{"objectId": "i1", "qty": 2}, {"objectId": "i2", "qty": 5}]
//! })).unwrap();
//!
//! let summary = merge(&mut plan, &update);
//! assert_eq!(summary.overwritten, 1);
//! assert_eq!(summary.appended, 1);
//! ```

use std::collections::btree_map::Entry;
use std::collections::HashMap;

use crate::document::{Document, Node};

/// What a merge changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    /// Keys added that were absent before
    pub inserted: usize,
    /// Values replaced because they differed
    pub overwritten: usize,
    /// Sequence elements appended
    pub appended: usize,
    /// Objects merged recursively (including matched sequence elements)
    pub merged: usize,
}

impl MergeSummary {
    /// True when the merge left the document unchanged.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.overwritten == 0 && self.appended == 0
    }
}

/// Merge `update` into `existing` in place.
pub fn merge(existing: &mut Document, update: &Document) -> MergeSummary {
    let mut summary = MergeSummary::default();
    merge_object(existing, update, &mut summary);
    summary
}

/// By-value form of [`merge`].
#[must_use]
pub fn merged(mut existing: Document, update: &Document) -> Document {
    merge(&mut existing, update);
    existing
}

fn merge_object(existing: &mut Document, update: &Document, summary: &mut MergeSummary) {
    for (key, incoming) in update {
        match existing.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(incoming.clone());
                summary.inserted += 1;
            }
            Entry::Occupied(mut slot) => match (slot.get_mut(), incoming) {
                (Node::Object(current), Node::Object(patch)) => {
                    summary.merged += 1;
                    merge_object(current, patch, summary);
                }
                (Node::Sequence(current), Node::Sequence(patch)) => {
                    merge_sequence(current, patch, summary);
                }
                (current, incoming) => {
                    if current != incoming {
                        *current = incoming.clone();
                        summary.overwritten += 1;
                    }
                }
            },
        }
    }
}

fn merge_sequence(existing: &mut Vec<Node>, update: &[Node], summary: &mut MergeSummary) {
    // objectId -> position; the first occurrence wins if ids repeat
    let mut positions: HashMap<String, usize> = HashMap::new();
    for (pos, node) in existing.iter().enumerate() {
        if let Some(id) = element_id(node) {
            positions.entry(id.to_string()).or_insert(pos);
        }
    }

    for incoming in update {
        match (element_id(incoming), incoming) {
            (Some(id), Node::Object(patch)) => match positions.get(id) {
                Some(&pos) => {
                    if let Node::Object(target) = &mut existing[pos] {
                        summary.merged += 1;
                        merge_object(target, patch, summary);
                    }
                }
                None => {
                    positions.insert(id.to_string(), existing.len());
                    existing.push(incoming.clone());
                    summary.appended += 1;
                }
            },
            // No identity to reconcile on: append unless an equal element is
            // already there.
            _ => {
                if !existing.contains(incoming) {
                    existing.push(incoming.clone());
                    summary.appended += 1;
                }
            }
        }
    }
}

fn element_id(node: &Node) -> Option<&str> {
    node.as_object().and_then(Document::object_id)
}
