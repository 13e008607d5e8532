// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Join schema for the search index.
//!
//! Declares which relation names may directly parent which others. The
//! schema is rendered into the index mapping once, at bootstrap:
//!
//! ```text
//! PUT /plan-index
//! {
//!   "settings": {"number_of_shards": 1, "number_of_replicas": 1},
//!   "mappings": {
//!     "properties": {
//!       "plan_join": {
//!         "type": "join",
//!         "relations": {
//!           "plan": ["planCostShares", "linkedPlanServices"],
//!           "linkedPlanServices": ["linkedService", "planserviceCostShares"]
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

/// Parent relation -> permitted child relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSchema {
    root: String,
    relations: BTreeMap<String, Vec<String>>,
}

impl JoinSchema {
    /// Empty schema with the given root relation.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            relations: BTreeMap::new(),
        }
    }

    /// Declare the children a parent relation may have.
    pub fn relation<I, S>(mut self, parent: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.relations.entry(parent.into()).or_default();
        for child in children {
            let child = child.into();
            if !entry.contains(&child) {
                entry.push(child);
            }
        }
        self
    }

    /// The plan hierarchy:
    /// `plan -> {planCostShares, linkedPlanServices}`,
    /// `linkedPlanServices -> {linkedService, planserviceCostShares}`.
    #[must_use]
    pub fn plan() -> Self {
        Self::new("plan")
            .relation("plan", ["planCostShares", "linkedPlanServices"])
            .relation("linkedPlanServices", ["linkedService", "planserviceCostShares"])
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    #[must_use]
    pub fn children_of(&self, parent: &str) -> &[String] {
        self.relations.get(parent).map_or(&[], Vec::as_slice)
    }

    /// Whether `child` may sit directly under `parent`.
    #[must_use]
    pub fn allows(&self, parent: &str, child: &str) -> bool {
        self.children_of(parent).iter().any(|c| c == child)
    }

    /// Whether a relation name appears anywhere in the schema.
    #[must_use]
    pub fn knows(&self, relation: &str) -> bool {
        relation == self.root
            || self.relations.contains_key(relation)
            || self.relations.values().any(|children| children.iter().any(|c| c == relation))
    }

    /// `mappings` section declaring the join field.
    #[must_use]
    pub fn mapping(&self, join_field: &str) -> Value {
        let relations: Map<String, Value> = self
            .relations
            .iter()
            .map(|(parent, children)| (parent.clone(), json!(children)))
            .collect();

        let mut properties = Map::new();
        properties.insert(
            join_field.to_string(),
            json!({"type": "join", "relations": relations}),
        );
        json!({ "properties": properties })
    }

    /// Full index creation body: settings plus mapping.
    #[must_use]
    pub fn index_body(&self, join_field: &str, shards: u32, replicas: u32) -> Value {
        json!({
            "settings": {
                "number_of_shards": shards,
                "number_of_replicas": replicas
            },
            "mappings": self.mapping(join_field)
        })
    }
}

impl Default for JoinSchema {
    fn default() -> Self {
        Self::plan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_schema_relations() {
        let schema = JoinSchema::plan();
        assert_eq!(schema.root(), "plan");
        assert!(schema.allows("plan", "planCostShares"));
        assert!(schema.allows("plan", "linkedPlanServices"));
        assert!(schema.allows("linkedPlanServices", "linkedService"));
        assert!(schema.allows("linkedPlanServices", "planserviceCostShares"));
        assert!(!schema.allows("plan", "linkedService"));
        assert!(schema.children_of("linkedService").is_empty());
    }

    #[test]
    fn test_knows_every_declared_name() {
        let schema = JoinSchema::plan();
        for name in ["plan", "planCostShares", "linkedPlanServices", "linkedService", "planserviceCostShares"] {
            assert!(schema.knows(name), "{name} should be known");
        }
        assert!(!schema.knows("items"));
    }

    #[test]
    fn test_relation_builder_dedupes() {
        let schema = JoinSchema::new("a").relation("a", ["b", "b"]).relation("a", ["c", "b"]);
        assert_eq!(schema.children_of("a"), &["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_mapping_body() {
        let mapping = JoinSchema::plan().mapping("plan_join");
        assert_eq!(mapping["properties"]["plan_join"]["type"], "join");
        assert_eq!(
            mapping["properties"]["plan_join"]["relations"]["plan"],
            json!(["planCostShares", "linkedPlanServices"])
        );
    }

    #[test]
    fn test_index_body_settings() {
        let body = JoinSchema::plan().index_body("plan_join", 1, 1);
        assert_eq!(body["settings"]["number_of_shards"], 1);
        assert_eq!(body["settings"]["number_of_replicas"], 1);
        assert!(body["mappings"]["properties"]["plan_join"].is_object());
    }
}
