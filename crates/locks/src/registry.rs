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

//! Registry of in-flight lock attempts.
//!
//! ## Purpose
//! Routes entry ownership changes, membership events and lock responses
//! to the compound futures that care about them. The registry keeps
//! non-owning handles keyed by future id; attempts deregister on terminal
//! completion, and dead handles are pruned on traversal.

use crate::future::NearLockFuture;
use async_trait::async_trait;
use plexcache_core::{NodeId, NodeRef, TopologyListener};
use plexcache_nearcache::{LockCandidate, NearEntry, OwnerChangeListener};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Registry of in-flight lock attempts on one node.
pub struct MvccFutureRegistry {
    futs: RwLock<HashMap<Uuid, Weak<NearLockFuture>>>,
}

impl MvccFutureRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            futs: RwLock::new(HashMap::new()),
        })
    }

    /// Register an attempt.
    pub async fn add_future(&self, fut: &Arc<NearLockFuture>) {
        self.futs
            .write()
            .await
            .insert(fut.fut_id(), Arc::downgrade(fut));
    }

    /// Deregister an attempt. Returns false when it was not registered.
    pub async fn remove_future(&self, fut_id: &Uuid) -> bool {
        self.futs.write().await.remove(fut_id).is_some()
    }

    /// Attempt registered under the future id, when still alive.
    pub async fn future(&self, fut_id: &Uuid) -> Option<Arc<NearLockFuture>> {
        self.futs.read().await.get(fut_id).and_then(Weak::upgrade)
    }

    /// Number of registered attempts (dead handles included until pruned).
    pub async fn len(&self) -> usize {
        self.futs.read().await.len()
    }

    /// True when no attempts are registered.
    pub async fn is_empty(&self) -> bool {
        self.futs.read().await.is_empty()
    }

    /// Live attempts, pruning handles whose futures are gone. The snapshot
    /// is taken under the read lock and dispatch happens outside it, so a
    /// notified future may deregister itself.
    async fn live(&self) -> Vec<Arc<NearLockFuture>> {
        let snapshot: Vec<(Uuid, Option<Arc<NearLockFuture>>)> = {
            let futs = self.futs.read().await;
            futs.iter()
                .map(|(id, weak)| (*id, weak.upgrade()))
                .collect()
        };

        let mut live = Vec::with_capacity(snapshot.len());
        let mut dead = Vec::new();
        for (id, fut) in snapshot {
            match fut {
                Some(fut) => live.push(fut),
                None => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut futs = self.futs.write().await;
            for id in dead {
                futs.remove(&id);
            }
        }

        live
    }

    /// Re-evaluate every pending attempt after a mapping pass.
    pub async fn recheck_pending_locks(&self) {
        for fut in self.live().await {
            fut.check_locks().await;
        }
    }

    /// Fan a membership departure out to the attempt mapped on the node.
    /// Returns true when some attempt had a mapping for it.
    pub async fn on_node_left(&self, node: NodeId) -> bool {
        let mut found = false;
        for fut in self.live().await {
            if fut.on_node_left(node).await {
                found = true;
            }
        }
        if !found {
            debug!(
                "No lock future has mapping for left node (ignoring) [node={}]",
                node
            );
        }
        found
    }
}

#[async_trait]
impl OwnerChangeListener for MvccFutureRegistry {
    async fn on_owner_changed(&self, entry: &Arc<NearEntry>, owner: Option<LockCandidate>) {
        for fut in self.live().await {
            if !fut.trackable() {
                continue;
            }
            fut.on_owner_changed(entry, owner.clone()).await;
        }
    }
}

#[async_trait]
impl TopologyListener for MvccFutureRegistry {
    async fn on_node_left(&self, node: &NodeRef) {
        MvccFutureRegistry::on_node_left(self, node.id).await;
    }
}
