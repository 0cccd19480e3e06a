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

//! Lock coordinator integration tests.
//!
//! These tests verify:
//! - Local-primary shortcut and remote fan-out acquisition
//! - Peer-departure remapping and the remap-to-same-node guard
//! - Timeout, cancellation and filter-rejection failure paths
//! - Reentry inside transactions and explicit lock marking
//! - Value reconciliation and read-event recording

use plexcache_core::{
    AffinityFunction, CacheConfig, Key, NodeId, NodeRef, RendezvousAffinity,
    TimeoutProcessor, TopologyService, VersionClock,
};
use plexcache_dht::{DhtTier, LocalDhtTier};
use plexcache_locks::{
    CacheContext, CacheIoHandler, LockAllOptions, LockError, MvccFutureRegistry,
    NearLockManager,
};
use plexcache_nearcache::{
    EntryFilter, NearCacheStore, OwnerChangeListener, RecordingEventSink,
};
use plexcache_transport::{InMemoryTransport, Message, MessageBus, MessageHandler};
use plexcache_tx::{NearTxLocal, TxManager, TxOptions};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Affinity with explicit per-key primary preference, falling back to
/// rendezvous hashing for unlisted keys.
struct TestAffinity {
    prefs: HashMap<Key, Vec<NodeId>>,
    fallback: RendezvousAffinity,
}

impl AffinityFunction for TestAffinity {
    fn affinity(&self, key: &Key, nodes: &[NodeRef]) -> Vec<NodeRef> {
        match self.prefs.get(key) {
            Some(order) => order
                .iter()
                .filter_map(|id| nodes.iter().find(|n| n.id == *id).cloned())
                .collect(),
            None => self.fallback.affinity(key, nodes),
        }
    }
}

/// Handler that swallows every message, simulating an unresponsive peer.
struct BlackholeHandler;

#[async_trait::async_trait]
impl MessageHandler for BlackholeHandler {
    async fn on_message(&self, _sender: NodeId, _message: Message) {}
}

struct TestNode {
    node: NodeRef,
    ctx: Arc<CacheContext>,
    manager: NearLockManager,
    dht: Arc<LocalDhtTier>,
    events: Arc<RecordingEventSink>,
}

struct Cluster {
    bus: Arc<MessageBus>,
    topology: Arc<TopologyService>,
    timeouts: Arc<TimeoutProcessor>,
    nodes: Vec<TestNode>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

impl Cluster {
    /// Build an `n`-node cluster wired over one in-memory bus. `prefs`
    /// pins a key's primary preference order by node index.
    async fn new(n: usize, prefs: &[(&str, &[usize])]) -> Self {
        init_tracing();
        let bus = MessageBus::new();
        let topology = TopologyService::new();
        let timeouts = TimeoutProcessor::new();
        let _ = timeouts.start();
        let clock = Arc::new(VersionClock::new());

        let mut refs = Vec::new();
        for i in 0..n {
            refs.push(topology.add_node(NodeId::random(), format!("node-{i}")).await);
        }

        let prefs: HashMap<Key, Vec<NodeId>> = prefs
            .iter()
            .map(|(key, order)| {
                (
                    key.to_string(),
                    order.iter().map(|i| refs[*i].id).collect(),
                )
            })
            .collect();
        let affinity: Arc<dyn AffinityFunction> = Arc::new(TestAffinity {
            prefs,
            fallback: RendezvousAffinity,
        });

        let mut nodes = Vec::new();
        for node in &refs {
            let registry = MvccFutureRegistry::new();
            let listener: Arc<dyn OwnerChangeListener> = registry.clone();
            let store = NearCacheStore::new(listener);
            let dht = LocalDhtTier::new(node.clone(), Arc::clone(&clock));
            let events = RecordingEventSink::new();

            let ctx = Arc::new(CacheContext {
                config: CacheConfig::default(),
                local: node.clone(),
                topology: Arc::clone(&topology),
                affinity: Arc::clone(&affinity),
                clock: Arc::clone(&clock),
                store,
                dht: dht.clone(),
                transport: Arc::new(InMemoryTransport::new(Arc::clone(&bus), node.id)),
                tm: TxManager::new(),
                mvcc: registry.clone(),
                timeouts: Arc::clone(&timeouts),
                events: events.clone(),
            });

            bus.register(node.id, CacheIoHandler::new(Arc::clone(&ctx))).await;
            topology.register_listener(registry.clone()).await;

            nodes.push(TestNode {
                node: node.clone(),
                ctx: Arc::clone(&ctx),
                manager: NearLockManager::new(ctx),
                dht,
                events,
            });
        }

        Self {
            bus,
            topology,
            timeouts,
            nodes,
        }
    }

    /// Replace a node's handler so it never answers.
    async fn blackhole(&self, idx: usize) {
        self.bus
            .register(self.nodes[idx].node.id, Arc::new(BlackholeHandler))
            .await;
    }
}

fn opts(keys: &[&str], timeout_ms: i64) -> LockAllOptions {
    LockAllOptions {
        keys: keys.iter().map(|k| k.to_string()).collect(),
        timeout_ms,
        thread_id: 1,
        ..Default::default()
    }
}

/// Single key owned by the local node: the attempt short-cuts into the
/// DHT tier, reconciles the authoritative value and never touches the
/// transport.
#[tokio::test]
async fn test_single_key_local_primary() {
    let cluster = Cluster::new(1, &[("k1", &[0])]).await;
    let n0 = &cluster.nodes[0];

    let seeded = n0.dht.put(&"k1".to_string(), json!("v")).await.unwrap();

    let mut options = opts(&["k1"], 1_000);
    options.retval = true;
    let fut = n0.manager.lock_all(options).await;

    assert_eq!(fut.wait().await.unwrap(), true);
    assert_eq!(cluster.bus.delivered(), 0);

    let entry = n0.ctx.store.entry_exx(&"k1".to_string()).await;
    let versioned = entry.versioned_value().await.unwrap().unwrap();
    assert_eq!(versioned.ver, seeded);
    assert_eq!(versioned.val, Some(json!("v")));

    // The candidate sits in the owner position of the entry queue.
    let owner = entry.candidate_owner().await.unwrap().unwrap();
    assert_eq!(owner.ver, fut.lock_ver());

    // The primary already observed this version near-side, so exactly one
    // read event is recorded by the near tier.
    assert_eq!(n0.events.len().await, 1);

    // Terminal completion deregistered the attempt and its timeout.
    assert!(n0.ctx.mvcc.is_empty().await);
    assert!(cluster.timeouts.is_empty().await);

    cluster.timeouts.stop();
}

/// Two keys mapped to two remote primaries: both answer, both entries end
/// up locked, and responses correlate through their mini ids.
#[tokio::test]
async fn test_two_keys_split_across_two_peers() {
    let cluster = Cluster::new(3, &[("k1", &[1]), ("k2", &[2])]).await;
    let n0 = &cluster.nodes[0];

    let top_ver = cluster.topology.topology_version().await;

    let mut options = opts(&["k1", "k2"], 2_000);
    options.retval = true;
    let fut = n0.manager.lock_all(options).await;

    assert_eq!(fut.wait().await.unwrap(), true);

    // One request and one response per peer.
    assert_eq!(cluster.bus.delivered(), 4);
    assert_eq!(fut.topology_version(), top_ver);

    let nodes = fut.nodes().await;
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().any(|n| n.id == cluster.nodes[1].node.id));
    assert!(nodes.iter().any(|n| n.id == cluster.nodes[2].node.id));

    for (key, owner_idx) in [("k1", 1usize), ("k2", 2usize)] {
        let entry = n0.ctx.store.entry_exx(&key.to_string()).await;
        assert!(entry
            .locked_locally_by(&fut.lock_ver().id, 1)
            .await
            .unwrap());
        let versioned = entry.versioned_value().await.unwrap().unwrap();
        assert_eq!(
            Some(versioned.ver),
            cluster.nodes[owner_idx]
                .dht
                .peek_exx(&key.to_string())
                .await
                .map(|s| s.versioned.ver)
        );
    }

    // Remote responses record a read event per key when values were
    // requested.
    assert_eq!(n0.events.len().await, 2);

    // A stale response for an unknown mini id is ignored.
    let stale = plexcache_transport::LockResponse::error(
        fut.lock_ver(),
        fut.fut_id(),
        uuid::Uuid::new_v4(),
        plexcache_transport::ResponseError::Timeout,
    );
    fut.on_response(cluster.nodes[1].node.id, stale).await;
    assert_eq!(fut.wait().await.unwrap(), true);

    cluster.timeouts.stop();
}

/// A peer departs before answering: its keys remap to the next affinity
/// candidate and the attempt still succeeds.
#[tokio::test]
async fn test_peer_leaves_mid_flight_remaps() {
    let cluster = Cluster::new(3, &[("k1", &[0]), ("k2", &[1, 2])]).await;
    let n0 = &cluster.nodes[0];
    let n1 = &cluster.nodes[1];
    let n2 = &cluster.nodes[2];

    cluster.blackhole(1).await;

    let fut = n0.manager.lock_all(opts(&["k1", "k2"], 5_000)).await;
    sleep(Duration::from_millis(50)).await;
    assert!(!fut.is_done());

    cluster.topology.remove_node(n1.node.id).await.unwrap();

    assert_eq!(fut.wait().await.unwrap(), true);

    // k2 was re-issued against the replacement primary.
    assert_eq!(
        n2.dht.lock_owner(&"k2".to_string()).await,
        Some(fut.lock_ver())
    );
    assert!(fut.nodes().await.iter().any(|n| n.id == n2.node.id));

    let entry = n0.ctx.store.entry_exx(&"k2".to_string()).await;
    assert!(entry
        .locked_locally_by(&fut.lock_ver().id, 1)
        .await
        .unwrap());

    cluster.timeouts.stop();
}

/// The departed peer was the only possible primary: the remap would only
/// re-target it, so the attempt fails.
#[tokio::test]
async fn test_remap_to_same_node_fails() {
    let cluster = Cluster::new(2, &[("k2", &[1])]).await;
    let n0 = &cluster.nodes[0];
    let n1 = &cluster.nodes[1];

    cluster.blackhole(1).await;

    let fut = n0.manager.lock_all(opts(&["k2"], 5_000)).await;
    sleep(Duration::from_millis(50)).await;

    cluster.topology.remove_node(n1.node.id).await.unwrap();

    let err = fut.wait().await.unwrap_err();
    assert!(matches!(err, LockError::RemapToSameNode { .. }));

    // No orphan candidate survives the failure.
    let entry = n0.ctx.store.entry_exx(&"k2".to_string()).await;
    assert!(!entry.has_lock_candidate(&fut.lock_ver()).await.unwrap());
    assert!(n0.ctx.mvcc.is_empty().await);

    cluster.timeouts.stop();
}

/// The peer never answers: the wall-clock timeout flips the attempt to an
/// unsuccessful (not failed) outcome and cleans everything up.
#[tokio::test]
async fn test_timeout_resolves_false() {
    let cluster = Cluster::new(2, &[("k1", &[1])]).await;
    let n0 = &cluster.nodes[0];

    cluster.blackhole(1).await;

    let fut = n0.manager.lock_all(opts(&["k1"], 80)).await;

    assert_eq!(fut.wait().await.unwrap(), false);
    assert!(fut.is_timed_out());

    let entry = n0.ctx.store.entry_exx(&"k1".to_string()).await;
    assert!(!entry.has_lock_candidate(&fut.lock_ver()).await.unwrap());

    // Timeout object and registry entry are gone; completion fired once.
    assert!(cluster.timeouts.is_empty().await);
    assert!(n0.ctx.mvcc.is_empty().await);
    assert!(!fut.cancel().await);
    assert_eq!(fut.wait().await.unwrap(), false);

    cluster.timeouts.stop();
}

/// The filter rejects the second key during enlistment: the first key's
/// candidate is undone locally and nothing goes on the wire.
#[tokio::test]
async fn test_filter_rejects_second_key() {
    let cluster = Cluster::new(2, &[("k1", &[1]), ("k2", &[1])]).await;
    let n0 = &cluster.nodes[0];

    let filter: EntryFilter = Arc::new(|snapshot| snapshot.key != "k2");
    let mut options = opts(&["k1", "k2"], 1_000);
    options.filter = Some(filter);

    let fut = n0.manager.lock_all(options).await;

    assert_eq!(fut.wait().await.unwrap(), false);
    assert_eq!(cluster.bus.delivered(), 0);

    let k1 = n0.ctx.store.entry_exx(&"k1".to_string()).await;
    assert!(!k1.has_lock_candidate(&fut.lock_ver()).await.unwrap());

    cluster.timeouts.stop();
}

/// A thread already holding a lock reenters through a transaction: no
/// remote request is issued and the primary node is marked explicit on
/// the transaction exactly once.
#[tokio::test]
async fn test_reentry_within_transaction() {
    let cluster = Cluster::new(1, &[("k1", &[0])]).await;
    let n0 = &cluster.nodes[0];

    let first = n0.manager.lock_all(opts(&["k1"], 1_000)).await;
    assert_eq!(first.wait().await.unwrap(), true);
    let delivered_before = cluster.bus.delivered();

    let tx = NearTxLocal::new(&n0.ctx.clock, 1, TxOptions::default());
    let mut options = opts(&["k1"], 1_000);
    options.tx = Some(Arc::clone(&tx));
    let fut = n0.manager.lock_all(options).await;

    assert_eq!(fut.wait().await.unwrap(), true);
    assert_eq!(fut.lock_ver(), tx.xid_ver());
    assert_eq!(cluster.bus.delivered(), delivered_before);

    let explicit = tx.explicit_nodes().await;
    assert_eq!(explicit.len(), 1);
    assert!(explicit.contains(&n0.node.id));

    // The original lock still holds the entry.
    assert_eq!(
        n0.dht.lock_owner(&"k1".to_string()).await,
        Some(first.lock_ver())
    );

    cluster.timeouts.stop();
}

/// Failure inside a transaction marks it rollback-only before the caller
/// observes the outcome; release defers to the rollback path.
#[tokio::test]
async fn test_tx_marked_rollback_only_on_failure() {
    let cluster = Cluster::new(2, &[("k1", &[1])]).await;
    let n0 = &cluster.nodes[0];

    cluster.blackhole(1).await;

    let tx = NearTxLocal::new(&n0.ctx.clock, 1, TxOptions::default());
    let mut options = opts(&["k1"], 80);
    options.tx = Some(Arc::clone(&tx));

    let fut = n0.manager.lock_all(options).await;
    assert_eq!(fut.wait().await.unwrap(), false);
    assert!(tx.is_rollback_only());

    cluster.timeouts.stop();
}

/// Cancellation completes the attempt exactly once and undoes local
/// enlistments.
#[tokio::test]
async fn test_cancel_in_flight_attempt() {
    let cluster = Cluster::new(2, &[("k1", &[1])]).await;
    let n0 = &cluster.nodes[0];

    cluster.blackhole(1).await;

    // Zero timeout waits indefinitely; only cancellation ends the attempt.
    let fut = n0.manager.lock_all(opts(&["k1"], 0)).await;
    sleep(Duration::from_millis(50)).await;

    assert!(fut.cancel().await);
    let err = fut.wait().await.unwrap_err();
    assert!(matches!(err, LockError::Cancelled));

    let entry = n0.ctx.store.entry_exx(&"k1".to_string()).await;
    assert!(!entry.has_lock_candidate(&fut.lock_ver()).await.unwrap());
    assert!(n0.ctx.mvcc.is_empty().await);

    cluster.timeouts.stop();
}

/// A second contending attempt waits until the first releases, then
/// acquires.
#[tokio::test]
async fn test_contended_acquisition_after_release() {
    let cluster = Cluster::new(1, &[("k1", &[0])]).await;
    let n0 = &cluster.nodes[0];

    let first = n0.manager.lock_all(opts(&["k1"], 1_000)).await;
    assert_eq!(first.wait().await.unwrap(), true);

    let second = {
        let manager = NearLockManager::new(Arc::clone(&n0.ctx));
        let mut options = opts(&["k1"], 2_000);
        options.thread_id = 2;
        tokio::spawn(async move {
            let fut = manager.lock_all(options).await;
            fut.wait().await
        })
    };

    sleep(Duration::from_millis(50)).await;
    n0.manager
        .unlock_all(&first.lock_ver(), &["k1".to_string()])
        .await;

    assert_eq!(second.await.unwrap().unwrap(), true);

    cluster.timeouts.stop();
}

/// Negative timeout fails immediately when the lock is unavailable.
#[tokio::test]
async fn test_negative_timeout_fails_fast() {
    let cluster = Cluster::new(1, &[("k1", &[0])]).await;
    let n0 = &cluster.nodes[0];

    let first = n0.manager.lock_all(opts(&["k1"], 1_000)).await;
    assert_eq!(first.wait().await.unwrap(), true);

    let mut options = opts(&["k1"], -1);
    options.thread_id = 2;
    let second = n0.manager.lock_all(options).await;

    assert_eq!(second.wait().await.unwrap(), false);

    // The first holder is untouched.
    assert_eq!(
        n0.dht.lock_owner(&"k1".to_string()).await,
        Some(first.lock_ver())
    );

    cluster.timeouts.stop();
}
