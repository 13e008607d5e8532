// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Plan document model.
//!
//! A [`Document`] is a JSON object tree. Values are a tagged union
//! ([`Node`]) so the merge and flatten passes can match exhaustively
//! instead of probing JSON types at runtime:
//!
//! ```text
//! Node
//!  ├── Scalar(Null | Bool | Number | String)
//!  ├── Object(Document)
//!  └── Sequence(Vec<Node>)
//! ```
//!
//! Every independently addressable sub-document carries an `objectId`
//! and an `objectType`. Keys are held in a `BTreeMap`, so iteration order
//! is always sorted and never depends on how the JSON was written.
//!
//! # Example
//!
//! ```
//! use plan_sync_engine::document::{Document, StoreKey};
//! use serde_json::json;
//!
//! let doc = Document::try_from(json!({
//!     "objectType": "plan",
//!     "objectId": "p1",
//!     "planType": "inNetwork"
//! })).unwrap();
//!
//! assert_eq!(doc.object_id(), Some("p1"));
//! assert_eq!(StoreKey::for_document(&doc).unwrap().as_str(), "plan_p1");
//! ```

mod key;

pub use key::StoreKey;

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Field carrying a sub-document's identity.
pub const OBJECT_ID: &str = "objectId";
/// Field naming a sub-document's kind.
pub const OBJECT_TYPE: &str = "objectType";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document root must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("document is missing string field '{0}'")]
    MissingIdentity(&'static str),
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
}

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

/// Any value inside a [`Document`].
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Object(Document),
    Sequence(Vec<Node>),
}

impl Node {
    /// Short type name, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Scalar(Scalar::Null) => "null",
            Node::Scalar(Scalar::Bool(_)) => "bool",
            Node::Scalar(Scalar::Number(_)) => "number",
            Node::Scalar(Scalar::String(_)) => "string",
            Node::Object(_) => "object",
            Node::Sequence(_) => "sequence",
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Node::Object(doc) => Some(doc),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Node::Sequence(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    /// True for objects and sequences.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        !matches!(self, Node::Scalar(_))
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Scalar(Scalar::Null),
            Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Node::Scalar(Scalar::Number(n)),
            Value::String(s) => Node::Scalar(Scalar::String(s)),
            Value::Array(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => Node::Object(Document::from_map(map)),
        }
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        match node {
            Node::Scalar(scalar) => scalar.into(),
            Node::Object(doc) => doc.into(),
            Node::Sequence(items) => Value::Array(items.into_iter().map(Value::from).collect()),
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Number(n) => Value::Number(n),
            Scalar::String(s) => Value::String(s),
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Scalar(Scalar::String(s.to_string()))
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Scalar(Scalar::String(s))
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Scalar(Scalar::Number(n.into()))
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Scalar(Scalar::Bool(b))
    }
}

impl From<Document> for Node {
    fn from(doc: Document) -> Self {
        Node::Object(doc)
    }
}

/// A JSON object tree with sorted keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Document {
    fields: BTreeMap<String, Node>,
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn from_map(map: Map<String, Value>) -> Self {
        Self {
            fields: map.into_iter().map(|(k, v)| (k, Node::from(v))).collect(),
        }
    }

    /// Parse a document from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| DocumentError::InvalidJson(e.to_string()))?;
        Self::try_from(value)
    }

    /// Parse a document from JSON bytes.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| DocumentError::InvalidJson(e.to_string()))?;
        Self::try_from(value)
    }

    /// Compact JSON text.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        Value::from(self.clone()).to_string()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.fields.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Node>) -> Option<Node> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Node> {
        self.fields.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Node> {
        self.fields.iter()
    }

    pub(crate) fn entry(&mut self, key: String) -> btree_map::Entry<'_, String, Node> {
        self.fields.entry(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `objectId`, if present and a string.
    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        self.get(OBJECT_ID).and_then(Node::as_str)
    }

    /// The `objectType`, if present and a string.
    #[must_use]
    pub fn object_type(&self) -> Option<&str> {
        self.get(OBJECT_TYPE).and_then(Node::as_str)
    }

    /// `(objectType, objectId)` when both are present.
    #[must_use]
    pub fn identity(&self) -> Option<(&str, &str)> {
        Some((self.object_type()?, self.object_id()?))
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Node);
    type IntoIter = btree_map::Iter<'a, String, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl TryFrom<Value> for Document {
    type Error = DocumentError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(DocumentError::NotAnObject(Node::from(other).kind())),
        }
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(
            doc.fields
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect(),
        )
    }
}
