// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry helpers for backend connections.
//!
//! Used for Redis connection setup, store queries and feed polling only.
//! Index mutations are never retried in-process: a failed event stays
//! unacknowledged and the feed redelivers it.

pub mod retry;
