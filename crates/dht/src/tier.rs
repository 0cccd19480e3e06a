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

//! DHT tier trait.

use crate::error::DhtResult;
use async_trait::async_trait;
use plexcache_core::{CacheVersion, DhtEntrySnapshot, Key, NodeRef};
use plexcache_nearcache::EntryFilter;
use plexcache_transport::{LockRequest, LockResponse};

/// The authoritative primary tier for locally-owned keys.
///
/// ## Purpose
/// Grants locks on primary replicas and answers with the authoritative
/// value and version per key. One implementation per deployment; the
/// in-memory [`crate::LocalDhtTier`] backs tests and single-process use.
#[async_trait]
pub trait DhtTier: Send + Sync {
    /// Snapshot of the primary entry for the key, when present.
    async fn peek_exx(&self, key: &Key) -> Option<DhtEntrySnapshot>;

    /// Lock all keys of the request on this primary.
    ///
    /// Waits out contention within the request's timeout. Lock-wait expiry
    /// is reported inside the response as the timeout sentinel, not as an
    /// error; the `Err` path is reserved for tier failures.
    async fn lock_all_async(
        &self,
        local_node: &NodeRef,
        req: LockRequest,
        keys: &[Key],
        filter: Option<EntryFilter>,
    ) -> DhtResult<LockResponse>;

    /// Release all locks held under the lock version. Idempotent.
    async fn remove_locks(&self, lock_ver: &CacheVersion, keys: &[Key]);
}
