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

//! Cluster topology service.
//!
//! ## Purpose
//! Tracks cluster membership with a monotonically increasing topology
//! version. Mapping passes take the read lock for their whole duration so
//! membership cannot shift underneath them; nodes joining mid-map become
//! visible only to later passes.
//!
//! ## Design
//! - Every membership change bumps the version and records a snapshot, so
//!   `all_nodes(ver)` can answer for historic versions still referenced by
//!   in-flight operations.
//! - Membership listeners are notified outside the write lock.

use crate::error::{CoreError, CoreResult};
use crate::node::{NodeId, NodeRef};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

/// Listener for cluster membership changes.
#[async_trait]
pub trait TopologyListener: Send + Sync {
    /// A node left the cluster.
    async fn on_node_left(&self, node: &NodeRef);

    /// A node joined the cluster.
    async fn on_node_joined(&self, _node: &NodeRef) {}
}

struct TopologyState {
    version: i64,
    nodes: Vec<NodeRef>,
    history: HashMap<i64, Vec<NodeRef>>,
    next_order: u64,
}

/// Read guard over a frozen topology.
///
/// Holding the guard blocks membership changes; version and node lookups
/// go through the guard so a mapping pass never re-acquires the lock.
pub struct TopologyReadGuard<'a> {
    inner: RwLockReadGuard<'a, TopologyState>,
}

impl TopologyReadGuard<'_> {
    /// Current topology version.
    pub fn version(&self) -> i64 {
        self.inner.version
    }

    /// All nodes at the given topology version. Falls back to the current
    /// node set when the version is not recorded.
    pub fn all_nodes(&self, ver: i64) -> Vec<NodeRef> {
        self.inner
            .history
            .get(&ver)
            .cloned()
            .unwrap_or_else(|| self.inner.nodes.clone())
    }

    /// Current node set.
    pub fn nodes(&self) -> Vec<NodeRef> {
        self.inner.nodes.clone()
    }
}

/// Cluster topology service.
pub struct TopologyService {
    state: RwLock<TopologyState>,
    listeners: RwLock<Vec<Arc<dyn TopologyListener>>>,
}

impl TopologyService {
    /// Create an empty topology at version 0.
    pub fn new() -> Arc<Self> {
        let mut history = HashMap::new();
        history.insert(0, Vec::new());

        Arc::new(Self {
            state: RwLock::new(TopologyState {
                version: 0,
                nodes: Vec::new(),
                history,
                next_order: 1,
            }),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Take the topology read lock for the duration of a mapping pass.
    pub async fn read_lock(&self) -> TopologyReadGuard<'_> {
        TopologyReadGuard {
            inner: self.state.read().await,
        }
    }

    /// Current topology version.
    pub async fn topology_version(&self) -> i64 {
        self.state.read().await.version
    }

    /// All nodes at the given topology version.
    pub async fn all_nodes(&self, ver: i64) -> Vec<NodeRef> {
        self.read_lock().await.all_nodes(ver)
    }

    /// Look up a current member by id.
    pub async fn node(&self, id: NodeId) -> Option<NodeRef> {
        self.state
            .read()
            .await
            .nodes
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    /// Register a membership listener.
    pub async fn register_listener(&self, listener: Arc<dyn TopologyListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Add a node to the cluster. Returns the node reference with its
    /// assigned join order.
    pub async fn add_node(&self, id: NodeId, name: impl Into<String>) -> NodeRef {
        let node = {
            let mut state = self.state.write().await;
            let node = NodeRef::new(id, name, state.next_order);
            state.next_order += 1;
            state.nodes.push(node.clone());
            state.version += 1;
            let snapshot = state.nodes.clone();
            let ver = state.version;
            state.history.insert(ver, snapshot);
            node
        };

        debug!("Node joined topology [node={}]", node);

        let listeners = self.listeners.read().await.clone();
        for l in listeners {
            l.on_node_joined(&node).await;
        }

        node
    }

    /// Remove a node from the cluster and notify listeners.
    pub async fn remove_node(&self, id: NodeId) -> CoreResult<NodeRef> {
        let node = {
            let mut state = self.state.write().await;
            let pos = state
                .nodes
                .iter()
                .position(|n| n.id == id)
                .ok_or_else(|| CoreError::NodeNotFound(id.to_string()))?;
            let node = state.nodes.remove(pos);
            state.version += 1;
            let snapshot = state.nodes.clone();
            let ver = state.version;
            state.history.insert(ver, snapshot);
            node
        };

        debug!("Node left topology [node={}]", node);

        let listeners = self.listeners.read().await.clone();
        for l in listeners {
            l.on_node_left(&node).await;
        }

        Ok(node)
    }
}
