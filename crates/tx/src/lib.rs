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

//! # PlexCache Transactions
//!
//! ## Purpose
//! The near-local transaction handle enlisted by lock acquisition, and the
//! transaction manager binding transactions to their logical owner thread.
//!
//! ## Architecture Context
//! Lock attempts running inside a transaction reuse the transaction's xid
//! version as their lock version, record per-node key mappings on the
//! transaction, and mark it rollback-only when acquisition fails so the
//! rollback path releases whatever was granted.

use plexcache_core::{CacheVersion, Key, NodeId, NodeRef, VersionClock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxIsolation {
    /// Committed reads only.
    ReadCommitted,
    /// Reads repeat within the transaction.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

/// Behavioral flags of a near-local transaction.
#[derive(Debug, Clone)]
pub struct TxOptions {
    /// Isolation level.
    pub isolation: TxIsolation,
    /// True for implicit (single-operation) transactions.
    pub implicit: bool,
    /// True for implicit transactions over exactly one key.
    pub implicit_single: bool,
    /// Eventually-consistent mode.
    pub ec: bool,
    /// True when the transaction invalidates entries instead of storing.
    pub invalidate: bool,
    /// Synchronous commit acknowledgements.
    pub sync_commit: bool,
    /// Synchronous rollback acknowledgements.
    pub sync_rollback: bool,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            isolation: TxIsolation::RepeatableRead,
            implicit: false,
            implicit_single: false,
            ec: false,
            invalidate: false,
            sync_commit: false,
            sync_rollback: false,
        }
    }
}

/// Near-local transaction.
///
/// ## Purpose
/// Tracks the identity, key mappings and rollback state of one
/// transaction on its originating node. Lock futures consult it for
/// version reuse and enlistment bookkeeping; they never drive commit or
/// rollback themselves.
pub struct NearTxLocal {
    xid_ver: CacheVersion,
    min_ver: CacheVersion,
    thread_id: u64,
    options: TxOptions,
    top_ver: AtomicI64,
    rollback_only: AtomicBool,
    mappings: Mutex<HashMap<NodeId, HashSet<Key>>>,
    explicit_nodes: Mutex<HashSet<NodeId>>,
}

impl NearTxLocal {
    /// Start a transaction owned by the given logical thread.
    pub fn new(clock: &VersionClock, thread_id: u64, options: TxOptions) -> Arc<Self> {
        let xid_ver = clock.next();

        Arc::new(Self {
            xid_ver,
            min_ver: xid_ver,
            thread_id,
            options,
            top_ver: AtomicI64::new(-1),
            rollback_only: AtomicBool::new(false),
            mappings: Mutex::new(HashMap::new()),
            explicit_nodes: Mutex::new(HashSet::new()),
        })
    }

    /// Transaction id version. Lock attempts inside this transaction lock
    /// under this version.
    pub fn xid_ver(&self) -> CacheVersion {
        self.xid_ver
    }

    /// Minimal version visible to this transaction.
    pub fn min_ver(&self) -> CacheVersion {
        self.min_ver
    }

    /// Logical owner thread.
    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    /// Isolation level.
    pub fn isolation(&self) -> TxIsolation {
        self.options.isolation
    }

    /// True for implicit transactions.
    pub fn implicit(&self) -> bool {
        self.options.implicit
    }

    /// True for implicit single-key transactions.
    pub fn implicit_single(&self) -> bool {
        self.options.implicit_single
    }

    /// Eventually-consistent mode.
    pub fn ec(&self) -> bool {
        self.options.ec
    }

    /// True when the transaction invalidates entries instead of storing.
    pub fn is_invalidate(&self) -> bool {
        self.options.invalidate
    }

    /// Synchronous commit acknowledgements.
    pub fn sync_commit(&self) -> bool {
        self.options.sync_commit
    }

    /// Synchronous rollback acknowledgements.
    pub fn sync_rollback(&self) -> bool {
        self.options.sync_rollback
    }

    /// Assign the transaction's topology version. The first call pins the
    /// given version; later calls return the pinned one.
    pub fn topology_version(&self, current: i64) -> i64 {
        let _ = self
            .top_ver
            .compare_exchange(-1, current, Ordering::SeqCst, Ordering::SeqCst);
        self.top_ver.load(Ordering::SeqCst)
    }

    /// Record per-node key mappings from a lock mapping pass.
    pub async fn add_key_mapping(&self, mapping: &[(NodeRef, Vec<Key>)]) {
        let mut mappings = self.mappings.lock().await;
        for (node, keys) in mapping {
            let entry = mappings.entry(node.id).or_default();
            for key in keys {
                entry.insert(key.clone());
            }
        }
    }

    /// Record that this transaction holds an explicit lock on the node.
    /// Returns true when the node was not marked before.
    pub async fn mark_explicit(&self, node: NodeId) -> bool {
        self.explicit_nodes.lock().await.insert(node)
    }

    /// Nodes marked as holding explicit locks.
    pub async fn explicit_nodes(&self) -> HashSet<NodeId> {
        self.explicit_nodes.lock().await.clone()
    }

    /// Drop the mapping for a departed node.
    pub async fn remove_mapping(&self, node: NodeId) -> Option<HashSet<Key>> {
        self.mappings.lock().await.remove(&node)
    }

    /// Keys mapped to the given node.
    pub async fn mapping(&self, node: NodeId) -> Option<HashSet<Key>> {
        self.mappings.lock().await.get(&node).cloned()
    }

    /// Mark the transaction rollback-only. Returns true on the first call.
    pub fn set_rollback_only(&self) -> bool {
        let marked = self
            .rollback_only
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if marked {
            debug!("Transaction marked rollback-only [xid={}]", self.xid_ver);
        }
        marked
    }

    /// True when the transaction can only roll back.
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }
}

/// Transaction manager.
///
/// Binds transactions to their logical owner thread so completion paths
/// can restore the thread's transaction context.
pub struct TxManager {
    contexts: Mutex<HashMap<u64, Arc<NearTxLocal>>>,
}

impl TxManager {
    /// Create a manager with no bound contexts.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            contexts: Mutex::new(HashMap::new()),
        })
    }

    /// Bind the transaction to its owner thread's context.
    pub async fn tx_context(&self, tx: &Arc<NearTxLocal>) {
        self.contexts
            .lock()
            .await
            .insert(tx.thread_id(), Arc::clone(tx));
    }

    /// Transaction currently bound to the given thread.
    pub async fn context_of(&self, thread_id: u64) -> Option<Arc<NearTxLocal>> {
        self.contexts.lock().await.get(&thread_id).cloned()
    }

    /// Clear the binding for a thread.
    pub async fn clear_context(&self, thread_id: u64) -> Option<Arc<NearTxLocal>> {
        self.contexts.lock().await.remove(&thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topology_version_pinned_once() {
        let clock = VersionClock::new();
        let tx = NearTxLocal::new(&clock, 1, TxOptions::default());

        assert_eq!(tx.topology_version(5), 5);
        assert_eq!(tx.topology_version(9), 5);
    }

    #[tokio::test]
    async fn test_rollback_only_set_once() {
        let clock = VersionClock::new();
        let tx = NearTxLocal::new(&clock, 1, TxOptions::default());

        assert!(!tx.is_rollback_only());
        assert!(tx.set_rollback_only());
        assert!(!tx.set_rollback_only());
        assert!(tx.is_rollback_only());
    }

    #[tokio::test]
    async fn test_key_mappings() {
        let clock = VersionClock::new();
        let tx = NearTxLocal::new(&clock, 1, TxOptions::default());
        let node = NodeRef::new(NodeId::random(), "node-1", 1);

        tx.add_key_mapping(&[(node.clone(), vec!["k1".to_string(), "k2".to_string()])])
            .await;
        assert_eq!(tx.mapping(node.id).await.unwrap().len(), 2);

        let removed = tx.remove_mapping(node.id).await.unwrap();
        assert!(removed.contains("k1"));
        assert!(tx.mapping(node.id).await.is_none());
    }

    #[tokio::test]
    async fn test_mark_explicit_once() {
        let clock = VersionClock::new();
        let tx = NearTxLocal::new(&clock, 1, TxOptions::default());
        let node = NodeId::random();

        assert!(tx.mark_explicit(node).await);
        assert!(!tx.mark_explicit(node).await);
        assert_eq!(tx.explicit_nodes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_manager_context_binding() {
        let clock = VersionClock::new();
        let manager = TxManager::new();
        let tx = NearTxLocal::new(&clock, 42, TxOptions::default());

        manager.tx_context(&tx).await;
        let bound = manager.context_of(42).await.unwrap();
        assert_eq!(bound.xid_ver(), tx.xid_ver());

        manager.clear_context(42).await;
        assert!(manager.context_of(42).await.is_none());
    }
}
