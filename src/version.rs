// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Content version tags.
//!
//! A [`VersionTag`] is the SHA-256 of a document's canonical JSON encoding
//! (keys sorted at every depth, no whitespace). Byte-identical content gives
//! an identical tag; any added, removed or changed value gives a different
//! one. Tags are opaque concurrency tokens, not timestamps.
//!
//! # Example
//!
//! ```
//! use plan_sync_engine::document::Document;
//! use plan_sync_engine::version::{tag, VersionTag};
//!
//! let a = Document::from_json_str(r#"{"objectId":"p1","planType":"inNetwork"}"#).unwrap();
//! let b = Document::from_json_str(r#"{"planType":"inNetwork","objectId":"p1"}"#).unwrap();
//! assert_eq!(tag(&a), tag(&b));
//!
//! let header = tag(&a).header_value();
//! assert!(tag(&a).matches_any(&header));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::document::{Document, Node, Scalar};

/// Deterministic content fingerprint of a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    /// Fingerprint a document.
    #[must_use]
    pub fn of(doc: &Document) -> Self {
        let canonical = canonical_json(doc);
        Self(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Wrap an already-computed tag (e.g. read back from a header).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strong entity-tag form: the hex digest in double quotes.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Compare against an `If-None-Match` / `If-Match` header value.
    ///
    /// Accepts a comma-separated list; each entry may be quoted and may
    /// carry a weak `W/` prefix. `*` matches any tag.
    #[must_use]
    pub fn matches_any(&self, header: &str) -> bool {
        header.split(',').map(str::trim).any(|candidate| {
            if candidate == "*" {
                return true;
            }
            let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
            let candidate = candidate.trim_matches('"');
            !candidate.is_empty() && candidate == self.0
        })
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a document. Shorthand for [`VersionTag::of`].
#[must_use]
pub fn tag(doc: &Document) -> VersionTag {
    VersionTag::of(doc)
}

/// Canonical JSON text of a document: sorted keys, no whitespace.
#[must_use]
pub fn canonical_json(doc: &Document) -> String {
    let mut out = String::new();
    write_object(&mut out, doc);
    out
}

fn write_object(out: &mut String, doc: &Document) {
    // Document iterates in key order already; collect and sort anyway so the
    // encoding never depends on the map type behind it.
    let mut entries: Vec<(&String, &Node)> = doc.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, node)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_node(out, node);
    }
    out.push('}');
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Scalar(Scalar::Null) => out.push_str("null"),
        Node::Scalar(Scalar::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
        Node::Scalar(Scalar::Number(n)) => out.push_str(&n.to_string()),
        Node::Scalar(Scalar::String(s)) => write_string(out, s),
        Node::Object(doc) => write_object(out, doc),
        Node::Sequence(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_node(out, item);
            }
            out.push(']');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // serde_json's escaping is the reference encoding for strings
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}
