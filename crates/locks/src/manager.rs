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

//! Near lock manager and the per-node cache context.
//!
//! ## Purpose
//! `CacheContext` bundles the collaborators one node wires together: the
//! topology service, affinity, near store, primary tier, transport,
//! transaction manager, MVCC registry, timeout processor and event sink.
//! Everything is an injected handle; there are no process-wide singletons,
//! which keeps multi-node tests deterministic.
//!
//! `NearLockManager` is the caller-facing surface: start a lock attempt,
//! release locks by version.

use crate::future::{LockAllOptions, NearLockFuture};
use crate::registry::MvccFutureRegistry;
use plexcache_core::{
    AffinityFunction, CacheConfig, CacheVersion, Key, NodeRef, TimeoutProcessor,
    TopologyService, VersionClock,
};
use plexcache_dht::DhtTier;
use plexcache_nearcache::{EntryError, EventSink, NearCacheStore};
use plexcache_transport::{LockReleaseRequest, Message, Transport};
use plexcache_tx::TxManager;
use std::sync::Arc;
use tracing::debug;

/// Collaborators of one cache node.
pub struct CacheContext {
    /// Cache configuration.
    pub config: CacheConfig,
    /// This node.
    pub local: NodeRef,
    /// Cluster topology service.
    pub topology: Arc<TopologyService>,
    /// Key-to-node affinity.
    pub affinity: Arc<dyn AffinityFunction>,
    /// Version clock of this node.
    pub clock: Arc<VersionClock>,
    /// Near-cache entry store.
    pub store: Arc<NearCacheStore>,
    /// Primary tier of this node.
    pub dht: Arc<dyn DhtTier>,
    /// Message delivery.
    pub transport: Arc<dyn Transport>,
    /// Transaction manager.
    pub tm: Arc<TxManager>,
    /// Registry of in-flight lock attempts.
    pub mvcc: Arc<MvccFutureRegistry>,
    /// Wall-clock timeout processor.
    pub timeouts: Arc<TimeoutProcessor>,
    /// Cache event sink.
    pub events: Arc<dyn EventSink>,
}

impl CacheContext {
    /// Release every lock held under the version: local near candidates
    /// are removed, remote primaries are asked to release, the local
    /// primary releases directly.
    pub async fn remove_locks(&self, lock_ver: &CacheVersion, keys: &[Key]) {
        debug!(
            "Removing locks [ver={}, keys={}, node={}]",
            lock_ver,
            keys.len(),
            self.local
        );

        for key in keys {
            loop {
                match self.store.peek(key).await {
                    None => break,
                    Some(entry) => match entry.remove_lock(lock_ver).await {
                        Ok(_) => break,
                        Err(EntryError::Removed(_)) => {
                            debug!(
                                "Attempted to remove lock on removed entry (will retry) [key={}]",
                                key
                            );
                        }
                    },
                }
            }
        }

        // Group keys by primary at the current topology.
        let groups: Vec<(NodeRef, Vec<Key>)> = {
            let topo = self.topology.read_lock().await;
            let nodes = topo.nodes();

            let mut groups: Vec<(NodeRef, Vec<Key>)> = Vec::new();
            for key in keys {
                let candidates = self.affinity.affinity(key, &nodes);
                if let Some(primary) = candidates.into_iter().next() {
                    match groups.iter_mut().find(|(n, _)| n.id == primary.id) {
                        Some((_, ks)) => ks.push(key.clone()),
                        None => groups.push((primary, vec![key.clone()])),
                    }
                }
            }
            groups
        };

        for (node, group_keys) in groups {
            if node.id == self.local.id {
                self.dht.remove_locks(lock_ver, &group_keys).await;
            } else {
                let msg = Message::LockRelease(LockReleaseRequest {
                    lock_ver: *lock_ver,
                    keys: group_keys,
                });
                if let Err(e) = self.transport.send(&node, msg).await {
                    debug!(
                        "Failed to send lock release (node left?) [node={}, err={}]",
                        node, e
                    );
                }
            }
        }
    }
}

/// Caller-facing lock acquisition surface of one node.
pub struct NearLockManager {
    ctx: Arc<CacheContext>,
}

impl NearLockManager {
    /// Create a manager over the node's context.
    pub fn new(ctx: Arc<CacheContext>) -> Self {
        Self { ctx }
    }

    /// Node context.
    pub fn context(&self) -> &Arc<CacheContext> {
        &self.ctx
    }

    /// Start a lock attempt over the given keys.
    ///
    /// The returned future resolves `Ok(true)` when every lock is held,
    /// `Ok(false)` on timeout or unavailability, and an error for fatal
    /// failures. Await it with [`NearLockFuture::wait`].
    pub async fn lock_all(&self, opts: LockAllOptions) -> Arc<NearLockFuture> {
        let fut = NearLockFuture::new(Arc::clone(&self.ctx), opts);
        fut.start().await;
        fut
    }

    /// Release every lock held under the version.
    pub async fn unlock_all(&self, lock_ver: &CacheVersion, keys: &[Key]) {
        self.ctx.remove_locks(lock_ver, keys).await;
    }
}
