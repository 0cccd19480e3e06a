// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexCache.
//
// PlexCache is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexCache is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexCache. If not, see <https://www.gnu.org/licenses/>.

//! # PlexCache Distributed Lock Coordinator
//!
//! ## Purpose
//! Acquires exclusive or read locks on a set of keys across the cluster,
//! with a bounded timeout and optionally inside a transaction. One
//! compound future per attempt maps keys to their primaries, enlists near
//! entries, fans out per-node requests, reconciles returned values into
//! the near tier, and resolves to a single atomic outcome.
//!
//! ## Architecture Context
//! - Keys owned by the local node short-cut directly into the DHT tier.
//! - Peer departures mid-acquisition remap the affected keys; a remap that
//!   would re-target a node that already held a key fails the attempt.
//! - Attempts inside a transaction reuse the transaction's xid version and
//!   mark it rollback-only on failure; lock release then defers to the
//!   transaction's rollback path.
//!
//! ## Example
//! ```rust,ignore
//! use plexcache_locks::{LockAllOptions, NearLockManager};
//!
//! let manager = NearLockManager::new(ctx);
//! let fut = manager
//!     .lock_all(LockAllOptions {
//!         keys: vec!["k1".to_string(), "k2".to_string()],
//!         timeout_ms: 1_000,
//!         thread_id: 1,
//!         ..Default::default()
//!     })
//!     .await;
//! let locked = fut.wait().await?;
//! ```

mod apply;
pub mod error;
pub mod future;
pub mod handler;
pub mod manager;
mod mini;
pub mod registry;

pub use error::{LockError, LockResult};
pub use future::{LockAllOptions, NearLockFuture};
pub use handler::CacheIoHandler;
pub use manager::{CacheContext, NearLockManager};
pub use registry::MvccFutureRegistry;
