// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document store backends.
//!
//! - [`memory::InMemoryStore`]: DashMap, for tests and embedding
//! - [`redis::RedisStore`]: one JSON string per key (`SET plan_<id> <json>`)

pub mod memory;
pub mod redis;
pub mod traits;

pub use traits::{DocumentStore, StorageError};
