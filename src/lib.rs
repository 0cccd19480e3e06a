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

//! PlexCache: a partitioned, replicated in-memory key-value store
//!
//! The store keeps authoritative data in a DHT tier partitioned across
//! cluster nodes and serves reads through a client-side near-cache tier.
//! Lock acquisition, transaction enlistment and value reconciliation are
//! coordinated by the near lock manager in `plexcache_locks`.
//!
//! Independent crates, re-exported here:
//! - `core`: node identity, cache versions, topology, affinity, timeouts
//! - `transport`: wire messages and pluggable message delivery
//! - `nearcache`: near entries with per-entry MVCC candidate queues
//! - `tx`: near-local transactions and the transaction manager
//! - `dht`: the authoritative primary tier
//! - `locks`: the distributed lock acquisition coordinator

#![warn(missing_docs)]

pub use plexcache_core as core;
pub use plexcache_dht as dht;
pub use plexcache_locks as locks;
pub use plexcache_nearcache as nearcache;
pub use plexcache_transport as transport;
pub use plexcache_tx as tx;
