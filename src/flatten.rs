// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hierarchy flattener.
//!
//! Decomposes a nested plan document into flat [`IndexNode`]s linked by a
//! parent/child join:
//!
//! ```text
//! plan p1                          IndexNode p1  parent=-   routing=p1  relation=plan
//!  ├─ planCostShares c1     ──►    IndexNode c1  parent=p1  routing=p1  relation=planCostShares
//!  └─ linkedPlanServices[]         IndexNode s1  parent=p1  routing=p1  relation=linkedPlanServices
//!      └─ s1                       IndexNode l1  parent=s1  routing=p1  relation=linkedService
//!          └─ linkedService l1
//! ```
//!
//! Every node is routed by the root's id so a whole tree lands on one shard.
//! Only scalar fields (and sequences of scalars) are copied into a node;
//! nested objects are represented by their own nodes.
//!
//! The traversal is depth-first pre-order and writes into an accumulator
//! owned by the call, so independent trees can be flattened concurrently.

use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::document::{Document, Node};

/// Relation name used for a root that has no `objectType`.
pub const ROOT_RELATION: &str = "root";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlattenError {
    #[error("root document has no objectId")]
    MissingRootId,
}

/// One flattened, independently indexed sub-document.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexNode {
    /// The sub-document's `objectId`
    pub id: String,
    /// `objectId` of the nearest addressable ancestor; `None` for the root
    pub parent_id: Option<String>,
    /// The root's `objectId`
    pub routing_id: String,
    /// Field name this node was nested under, or the root's `objectType`
    pub relation_name: String,
    /// Scalar fields of the sub-document
    pub fields: Document,
}

impl IndexNode {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Value of the join field: the relation name for a root,
    /// `{"name": relation, "parent": parent_id}` for a child.
    #[must_use]
    pub fn join_value(&self) -> Value {
        match &self.parent_id {
            None => Value::String(self.relation_name.clone()),
            Some(parent) => {
                let mut join = Map::new();
                join.insert("name".to_string(), Value::String(self.relation_name.clone()));
                join.insert("parent".to_string(), Value::String(parent.clone()));
                Value::Object(join)
            }
        }
    }

    /// Index document body: the scalar fields plus the join field.
    #[must_use]
    pub fn to_source(&self, join_field: &str) -> Value {
        let mut source = match Value::from(self.fields.clone()) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        source.insert(join_field.to_string(), self.join_value());
        Value::Object(source)
    }
}

/// Flatten a document tree into index nodes, root first.
pub fn flatten(root: &Document) -> Result<Vec<IndexNode>, FlattenError> {
    let root_id = root.object_id().ok_or(FlattenError::MissingRootId)?;
    let relation = root.object_type().unwrap_or(ROOT_RELATION);

    let mut nodes = Vec::new();
    visit(root, root_id, None, relation, root_id, &mut nodes);
    Ok(nodes)
}

fn visit(
    doc: &Document,
    id: &str,
    parent: Option<&str>,
    relation: &str,
    routing: &str,
    out: &mut Vec<IndexNode>,
) {
    out.push(IndexNode {
        id: id.to_string(),
        parent_id: parent.map(str::to_string),
        routing_id: routing.to_string(),
        relation_name: relation.to_string(),
        fields: scalar_fields(doc),
    });

    for (key, value) in doc {
        descend(value, key, id, routing, out);
    }
}

fn descend(node: &Node, relation: &str, parent: &str, routing: &str, out: &mut Vec<IndexNode>) {
    match node {
        Node::Scalar(_) => {}
        Node::Object(child) => match child.object_id() {
            Some(child_id) => visit(child, child_id, Some(parent), relation, routing, out),
            // Not addressable: look through it for addressable descendants
            None => {
                for (key, value) in child {
                    descend(value, key, parent, routing, out);
                }
            }
        },
        Node::Sequence(items) => {
            for item in items {
                descend(item, relation, parent, routing, out);
            }
        }
    }
}

fn scalar_fields(doc: &Document) -> Document {
    let mut fields = Document::new();
    for (key, value) in doc {
        if is_flat(value) {
            fields.insert(key.clone(), value.clone());
        }
    }
    fields
}

fn is_flat(node: &Node) -> bool {
    match node {
        Node::Scalar(_) => true,
        Node::Object(_) => false,
        Node::Sequence(items) => items.iter().all(|item| matches!(item, Node::Scalar(_))),
    }
}

/// Every `objectId` present in the tree, root included, in traversal order
/// and without duplicates. The id set equals the one produced by [`flatten`].
#[must_use]
pub fn collect_ids(root: &Document) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    collect_from_object(root, &mut seen, &mut ids);
    ids
}

fn collect_from_object(doc: &Document, seen: &mut HashSet<String>, ids: &mut Vec<String>) {
    if let Some(id) = doc.object_id() {
        if seen.insert(id.to_string()) {
            ids.push(id.to_string());
        }
    }
    for (_, value) in doc {
        collect_from_node(value, seen, ids);
    }
}

fn collect_from_node(node: &Node, seen: &mut HashSet<String>, ids: &mut Vec<String>) {
    match node {
        Node::Scalar(_) => {}
        Node::Object(doc) => collect_from_object(doc, seen, ids),
        Node::Sequence(items) => {
            for item in items {
                collect_from_node(item, seen, ids);
            }
        }
    }
}
