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

//! Compound lock future.
//!
//! ## Purpose
//! One instance per lock attempt. Maps keys to their primaries against a
//! topology snapshot frozen for the attempt's lifetime, enlists near
//! entries with local MVCC candidates, fans requests out per primary, and
//! resolves to a single outcome once every enlisted entry is locked or any
//! fatal condition fires.
//!
//! ## Concurrency
//! The future never blocks a task waiting for a peer: it is driven by
//! whichever task delivers the next event (transport receive, timeout
//! processor, membership dispatch). Terminal completion is a single-shot
//! race; whoever wins deregisters the future and its timeout object.

use crate::apply::{self, ApplyMode};
use crate::error::{LockError, LockResult};
use crate::manager::CacheContext;
use crate::mini::{AttemptFuture, LocalFuture, MiniFuture};
use async_trait::async_trait;
use chrono::Utc;
use plexcache_core::{
    primary, CacheVersion, Key, NodeId, NodeRef, TimeoutObject, VersionedValue,
};
use plexcache_nearcache::{
    EntryError, EntryFilter, EntrySnapshot, LockCandidate, NearEntry,
};
use plexcache_transport::{KeyLockBlock, LockRequest, LockResponse, Message, ResponseError};
use plexcache_tx::NearTxLocal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

/// Options for one lock attempt.
#[derive(Clone)]
pub struct LockAllOptions {
    /// Keys to lock, in caller order.
    pub keys: Vec<Key>,
    /// Acquisition timeout in milliseconds. Zero waits indefinitely; a
    /// negative value fails immediately when a lock is not available.
    pub timeout_ms: i64,
    /// Acquire read locks.
    pub read: bool,
    /// Return current values with the acquired locks.
    pub retval: bool,
    /// Logical owner of the locks. Ignored when a transaction is present.
    pub thread_id: u64,
    /// Enclosing transaction, when any.
    pub tx: Option<Arc<NearTxLocal>>,
    /// Entry filter; the attempt fails when it rejects an enlisted entry.
    pub filter: Option<EntryFilter>,
}

impl Default for LockAllOptions {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            timeout_ms: 0,
            read: false,
            retval: false,
            thread_id: 0,
            tx: None,
            filter: None,
        }
    }
}

/// Deferred failure discovered during a mapping pass. Dispatched after the
/// topology read lock is released.
enum MapAbort {
    Error(LockError),
    FilterReject,
    FailedNegativeTimeout,
}

/// Outcome of enlisting one key.
enum AddEntryOutcome {
    Candidate(LockCandidate),
    Null { fail_fast: bool },
}

struct PendingRequest {
    node: NodeRef,
    req: LockRequest,
    block_keys: Vec<Key>,
}

/// Compound future for one distributed lock attempt.
pub struct NearLockFuture {
    ctx: Arc<CacheContext>,
    keys: Vec<Key>,
    tx: Option<Arc<NearTxLocal>>,
    read: bool,
    retval: bool,
    timeout_ms: i64,
    filter: Option<EntryFilter>,
    thread_id: u64,
    lock_ver: CacheVersion,
    fut_id: Uuid,

    top_ver: AtomicI64,
    entries: Mutex<Vec<Arc<NearEntry>>>,
    val_map: Mutex<HashMap<Key, VersionedValue>>,
    left_nodes: Mutex<HashSet<NodeId>>,
    err: Mutex<Option<LockError>>,
    timed_out: AtomicBool,
    trackable: AtomicBool,
    cancelled: AtomicBool,
    initialized: AtomicBool,
    pending: AtomicUsize,
    all_ok: AtomicBool,
    futs: Mutex<Vec<AttemptFuture>>,
    timeout_obj: Mutex<Option<Arc<LockTimeoutObject>>>,

    outcome: Mutex<Option<LockResult<bool>>>,
    done: AtomicBool,
    done_notify: Notify,
}

impl NearLockFuture {
    pub(crate) fn new(ctx: Arc<CacheContext>, opts: LockAllOptions) -> Arc<Self> {
        let thread_id = opts
            .tx
            .as_ref()
            .map(|tx| tx.thread_id())
            .unwrap_or(opts.thread_id);
        let lock_ver = opts
            .tx
            .as_ref()
            .map(|tx| tx.xid_ver())
            .unwrap_or_else(|| ctx.clock.next());

        Arc::new(Self {
            ctx,
            keys: opts.keys,
            tx: opts.tx,
            read: opts.read,
            retval: opts.retval,
            timeout_ms: opts.timeout_ms,
            filter: opts.filter,
            thread_id,
            lock_ver,
            fut_id: Uuid::new_v4(),
            top_ver: AtomicI64::new(-1),
            entries: Mutex::new(Vec::new()),
            val_map: Mutex::new(HashMap::new()),
            left_nodes: Mutex::new(HashSet::new()),
            err: Mutex::new(None),
            timed_out: AtomicBool::new(false),
            trackable: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            all_ok: AtomicBool::new(true),
            futs: Mutex::new(Vec::new()),
            timeout_obj: Mutex::new(None),
            outcome: Mutex::new(None),
            done: AtomicBool::new(false),
            done_notify: Notify::new(),
        })
    }

    /// Register with the MVCC registry and the timeout processor, then run
    /// the initial mapping pass.
    pub(crate) async fn start(self: &Arc<Self>) {
        self.ctx.mvcc.add_future(self).await;

        if self.timeout_ms > 0 {
            let obj = Arc::new(LockTimeoutObject::new(self));
            *self.timeout_obj.lock().await = Some(Arc::clone(&obj));
            self.ctx.timeouts.add_timeout_object(obj).await;
        }

        self.map().await;
    }

    /// Future id.
    pub fn fut_id(&self) -> Uuid {
        self.fut_id
    }

    /// Lock version of the attempt.
    pub fn lock_ver(&self) -> CacheVersion {
        self.lock_ver
    }

    /// Keys of the attempt, in caller order.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Topology version the attempt mapped against (-1 before mapping).
    pub fn topology_version(&self) -> i64 {
        self.top_ver.load(Ordering::SeqCst)
    }

    /// True once the terminal outcome is set.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// True when the attempt timed out.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// True while the registry should deliver owner-change notifications.
    pub fn trackable(&self) -> bool {
        self.trackable.load(Ordering::SeqCst)
    }

    /// Stop owner-change notifications for this attempt.
    pub fn mark_not_trackable(&self) {
        self.trackable.store(false, Ordering::SeqCst);
    }

    /// Enclosing transaction, when any.
    pub fn tx(&self) -> Option<Arc<NearTxLocal>> {
        self.tx.clone()
    }

    /// Nodes participating in the attempt.
    pub async fn nodes(&self) -> Vec<NodeRef> {
        self.futs
            .lock()
            .await
            .iter()
            .map(|f| f.node().clone())
            .collect()
    }

    /// Snapshot of the enlisted entries.
    pub async fn entries_copy(&self) -> Vec<Arc<NearEntry>> {
        self.entries.lock().await.clone()
    }

    /// Await the terminal outcome.
    pub async fn wait(&self) -> LockResult<bool> {
        loop {
            let notified = self.done_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.outcome.lock().await.clone() {
                return outcome;
            }

            notified.await;
        }
    }

    /// Await the terminal outcome, giving up after the duration.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<LockResult<bool>> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Cancel the attempt. Returns true when it completed as cancelled.
    pub async fn cancel(self: &Arc<Self>) -> bool {
        if !self.is_done()
            && self
                .cancelled
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.on_complete(false, true).await;
        }

        matches!(
            self.outcome.lock().await.as_ref(),
            Some(Err(LockError::Cancelled))
        )
    }

    pub(crate) fn ctx(&self) -> &Arc<CacheContext> {
        &self.ctx
    }

    pub(crate) fn retval(&self) -> bool {
        self.retval
    }

    fn in_tx(&self) -> bool {
        self.tx.is_some()
    }

    pub(crate) fn ec(&self) -> bool {
        self.tx.as_ref().map(|tx| tx.ec()).unwrap_or(false)
    }

    fn implicit_single_tx(&self) -> bool {
        self.tx
            .as_ref()
            .map(|tx| tx.implicit_single())
            .unwrap_or(false)
    }

    /// Visibility floor handed to entry acknowledgement.
    pub(crate) fn min_ver(&self) -> CacheVersion {
        self.tx
            .as_ref()
            .map(|tx| tx.min_ver())
            .unwrap_or(self.lock_ver)
    }

    pub(crate) async fn val_map_get(&self, key: &Key) -> Option<VersionedValue> {
        self.val_map.lock().await.get(key).cloned()
    }

    pub(crate) async fn replace_entry(&self, key: &Key, fresh: Arc<NearEntry>) {
        let mut entries = self.entries.lock().await;
        if let Some(slot) = entries.iter_mut().find(|e| e.key() == key) {
            *slot = fresh;
        }
    }

    pub(crate) async fn add_left_node(&self, node: &NodeRef) {
        self.left_nodes.lock().await.insert(node.id);
    }

    pub(crate) fn set_timed_out(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
    }

    fn filter_pass(&self, snapshot: &EntrySnapshot) -> bool {
        self.filter.as_ref().map(|f| f(snapshot)).unwrap_or(true)
    }

    /// Initial mapping pass.
    pub(crate) async fn map(self: &Arc<Self>) {
        let keys = self.keys.clone();
        self.map_keys(&keys, &[]).await;
        self.mark_initialized().await;
    }

    async fn mark_initialized(self: &Arc<Self>) {
        self.initialized.store(true, Ordering::SeqCst);
        debug!("Marked lock future initialized [fut={}]", self.fut_id);
        self.check_pending_complete().await;
    }

    /// Map keys onto their primaries and dispatch per-node requests.
    /// `prior` holds the mapping being replaced when a peer departed; a
    /// key re-targeting a node that already held it fails the attempt.
    pub(crate) async fn map_keys(self: &Arc<Self>, keys: &[Key], prior: &[(NodeRef, Vec<Key>)]) {
        let mapped: Result<Vec<PendingRequest>, MapAbort> = {
            // Hold the topology read lock for the whole pass so membership
            // cannot shift underneath the mapping.
            let topo = self.ctx.topology.read_lock().await;
            self.map_keys_locked(&topo, keys, prior).await
        };

        match mapped {
            Err(MapAbort::Error(e)) => {
                self.on_error(e).await;
            }
            Err(MapAbort::FilterReject) => {
                self.on_complete(false, false).await;
            }
            Err(MapAbort::FailedNegativeTimeout) => {
                self.on_failed(false).await;
            }
            Ok(reqs) => {
                self.ctx.mvcc.recheck_pending_locks().await;
                self.dispatch(reqs).await;
            }
        }
    }

    async fn map_keys_locked(
        self: &Arc<Self>,
        topo: &plexcache_core::TopologyReadGuard<'_>,
        keys: &[Key],
        prior: &[(NodeRef, Vec<Key>)],
    ) -> Result<Vec<PendingRequest>, MapAbort> {
        let top_ver = match &self.tx {
            Some(tx) => {
                let assigned = tx.topology_version(topo.version());
                let _ = self
                    .top_ver
                    .compare_exchange(-1, assigned, Ordering::SeqCst, Ordering::SeqCst);
                assigned
            }
            None => {
                let _ = self.top_ver.compare_exchange(
                    -1,
                    topo.version(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                self.top_ver.load(Ordering::SeqCst)
            }
        };

        let left = self.left_nodes.lock().await.clone();
        let nodes: Vec<NodeRef> = topo
            .all_nodes(top_ver)
            .into_iter()
            .filter(|n| !left.contains(&n.id))
            .collect();

        // Assign keys to primary nodes, preserving insertion order.
        let mut mappings: Vec<(NodeRef, Vec<Key>)> = Vec::new();
        for key in keys {
            let candidates = self.ctx.affinity.affinity(key, &nodes);
            let node = match primary(&candidates) {
                Some(node) => node.clone(),
                None => {
                    // No live candidate remains; a remap could only
                    // re-target the departed primary.
                    let err = match prior.iter().find(|(_, ks)| ks.contains(key)) {
                        Some((node, _)) => LockError::RemapToSameNode {
                            key: key.clone(),
                            node: node.name.clone(),
                        },
                        None => LockError::NoPrimary(key.clone()),
                    };
                    return Err(MapAbort::Error(err));
                }
            };

            if prior
                .iter()
                .any(|(n, ks)| n.id == node.id && ks.contains(key))
            {
                return Err(MapAbort::Error(LockError::RemapToSameNode {
                    key: key.clone(),
                    node: node.name.clone(),
                }));
            }

            match mappings.iter_mut().find(|(n, _)| n.id == node.id) {
                Some((_, ks)) => ks.push(key.clone()),
                None => mappings.push((node, vec![key.clone()])),
            }
        }

        if self.is_done() {
            debug!("Abandoning (re)map because future is done [fut={}]", self.fut_id);
            return Ok(Vec::new());
        }

        debug!(
            "Starting (re)map for mappings [fut={}, nodes={}]",
            self.fut_id,
            mappings.len()
        );

        if let Some(tx) = &self.tx {
            tx.add_key_mapping(&mappings).await;
        }

        let (in_tx, implicit_tx, implicit_single_tx, isolation, invalidate, sync_commit, sync_rollback) =
            match &self.tx {
                Some(tx) => (
                    true,
                    tx.implicit(),
                    tx.implicit_single(),
                    Some(tx.isolation()),
                    tx.is_invalidate(),
                    tx.sync_commit(),
                    tx.sync_rollback(),
                ),
                None => (false, false, false, None, false, false, false),
            };

        let mut reqs: Vec<PendingRequest> = Vec::new();

        for (node, mapped_keys) in mappings {
            let mut req: Option<LockRequest> = None;
            let mut block_keys: Vec<Key> = Vec::new();
            let mut distribute = false;

            for key in &mapped_keys {
                let mut explicit = false;

                loop {
                    let entry = self.ctx.store.entry_exx(key).await;

                    let snapshot = entry.wrap().await;
                    if !self.filter_pass(&snapshot) {
                        debug!(
                            "Entry being locked did not pass filter (will not lock) [key={}]",
                            key
                        );
                        return Err(MapAbort::FilterReject);
                    }

                    match self.add_entry(top_ver, &entry, node.id).await {
                        Err(EntryError::Removed(_)) => {
                            debug!(
                                "Got removed entry in lock_all (will retry) [key={}]",
                                key
                            );
                            continue;
                        }
                        Ok(AddEntryOutcome::Null { fail_fast }) => {
                            if fail_fast {
                                debug!(
                                    "Failed to acquire lock with negative timeout [key={}]",
                                    key
                                );
                                return Err(MapAbort::FailedNegativeTimeout);
                            }
                            if self.is_done() {
                                return Ok(Vec::new());
                            }
                            // Reentry swallowed inside the transaction.
                            explicit = match (&self.tx, entry.has_lock_candidate(&self.tx_xid()).await) {
                                (Some(_), Ok(has)) => !has,
                                (Some(_), Err(EntryError::Removed(_))) => continue,
                                (None, _) => false,
                            };
                            break;
                        }
                        Ok(AddEntryOutcome::Candidate(cand)) => {
                            if self.is_done() {
                                return Ok(Vec::new());
                            }

                            if cand.reentry {
                                explicit = match (&self.tx, entry.has_lock_candidate(&self.tx_xid()).await) {
                                    (Some(_), Ok(has)) => !has,
                                    (Some(_), Err(EntryError::Removed(_))) => continue,
                                    (None, _) => false,
                                };
                            }

                            let versioned = match entry.versioned_value().await {
                                Ok(v) => v,
                                Err(EntryError::Removed(_)) => continue,
                            };
                            let versioned = match versioned {
                                Some(v) => Some(v),
                                None => self
                                    .ctx
                                    .dht
                                    .peek_exx(key)
                                    .await
                                    .map(|snapshot| snapshot.versioned),
                            };

                            let mut dht_ver = None;
                            if let Some(v) = versioned {
                                dht_ver = Some(v.ver);
                                self.val_map.lock().await.insert(key.clone(), v);
                            }

                            let local_peer = node.id == self.ctx.local.id;
                            let key_bytes = if cand.reentry || local_peer {
                                None
                            } else {
                                match serde_json::to_vec(key) {
                                    Ok(bytes) => Some(bytes),
                                    Err(e) => {
                                        return Err(MapAbort::Error(
                                            LockError::SerializationError(e.to_string()),
                                        ))
                                    }
                                }
                            };

                            let req = req.get_or_insert_with(|| LockRequest {
                                top_ver,
                                sender: self.ctx.local.id,
                                thread_id: self.thread_id,
                                fut_id: self.fut_id,
                                lock_ver: self.lock_ver,
                                in_tx,
                                implicit_tx,
                                implicit_single_tx,
                                read: self.read,
                                isolation,
                                invalidate,
                                timeout_ms: self.timeout_ms,
                                sync_commit,
                                sync_rollback,
                                mini_id: Uuid::nil(),
                                keys: Vec::new(),
                                has_filter: self.filter.is_some(),
                            });

                            req.keys.push(KeyLockBlock {
                                key: key.clone(),
                                key_bytes,
                                want_return: self.retval && dht_ver.is_none(),
                                candidates: Vec::new(),
                                dht_ver,
                            });
                            block_keys.push(key.clone());

                            distribute |= !cand.reentry;
                            break;
                        }
                    }
                }

                // Record the explicit lock on the transaction.
                if explicit {
                    if let Some(tx) = &self.tx {
                        tx.mark_explicit(node.id).await;
                    }
                }
            }

            if distribute {
                if let Some(req) = req {
                    reqs.push(PendingRequest {
                        node,
                        req,
                        block_keys,
                    });
                }
            }
        }

        Ok(reqs)
    }

    fn tx_xid(&self) -> CacheVersion {
        self.tx
            .as_ref()
            .map(|tx| tx.xid_ver())
            .unwrap_or(self.lock_ver)
    }

    /// Enlist one entry: append the local MVCC candidate and track it for
    /// response correlation and undo.
    async fn add_entry(
        &self,
        top_ver: i64,
        entry: &Arc<NearEntry>,
        dht_node_id: NodeId,
    ) -> Result<AddEntryOutcome, EntryError> {
        // Check if lock acquisition already timed out.
        if self.is_timed_out() {
            return Ok(AddEntryOutcome::Null { fail_fast: false });
        }

        // Remap fast path: the candidate already exists, only its primary
        // and topology stamps move.
        if let Some(cand) = entry.dht_node_id(&self.lock_ver, dht_node_id).await? {
            entry.candidate_topology(&self.lock_ver, top_ver).await?;
            return Ok(AddEntryOutcome::Candidate(cand));
        }

        let cand = entry
            .add_near_local(
                self.ctx.local.id,
                dht_node_id,
                self.thread_id,
                self.lock_ver,
                self.timeout_ms,
                self.ec(),
                self.in_tx(),
                self.implicit_single_tx(),
            )
            .await?;

        if cand.is_some() {
            entry.candidate_topology(&self.lock_ver, top_ver).await?;
        }

        {
            // Index-stable: a retry after eviction replaces the stale
            // entry object instead of growing the list.
            let mut entries = self.entries.lock().await;
            match entries.iter_mut().find(|e| e.key() == entry.key()) {
                Some(slot) => *slot = Arc::clone(entry),
                None => entries.push(Arc::clone(entry)),
            }
        }

        let cand = match cand {
            Some(cand) => cand,
            None => {
                return Ok(AddEntryOutcome::Null {
                    fail_fast: self.timeout_ms < 0,
                })
            }
        };

        // Double check if lock acquisition timed out meanwhile.
        if self.is_timed_out() {
            entry.remove_lock(&self.lock_ver).await?;
            return Ok(AddEntryOutcome::Null { fail_fast: false });
        }

        Ok(AddEntryOutcome::Candidate(cand))
    }

    async fn dispatch(self: &Arc<Self>, reqs: Vec<PendingRequest>) {
        for pending in reqs {
            let PendingRequest {
                node,
                mut req,
                block_keys,
            } = pending;

            if node.id == self.ctx.local.id {
                req.mini_id = Uuid::new_v4();
                debug!("Before locally locking near request [fut={}]", self.fut_id);
                self.dispatch_local(node, req, block_keys).await;
            } else {
                let mini = MiniFuture::new(self, node.clone(), block_keys);
                req.mini_id = mini.mini_id();

                self.pending.fetch_add(1, Ordering::SeqCst);
                self.futs
                    .lock()
                    .await
                    .push(AttemptFuture::Remote(Arc::clone(&mini)));

                debug!(
                    "Sending near lock request [node={}, fut={}, mini={}]",
                    node,
                    self.fut_id,
                    mini.mini_id()
                );

                match self.ctx.transport.send(&node, Message::LockRequest(req)).await {
                    Ok(()) => {}
                    Err(e) => match LockError::from(e) {
                        LockError::NodeLeft(reason) => {
                            mini.on_peer_left(&reason).await;
                        }
                        other => {
                            self.on_error(other).await;
                        }
                    },
                }
            }
        }
    }

    /// Local-primary shortcut: the DHT tier is invoked directly and its
    /// response applied by an embedded task.
    async fn dispatch_local(self: &Arc<Self>, node: NodeRef, req: LockRequest, keys: Vec<Key>) {
        let local = LocalFuture::new(node.clone());
        let done = Arc::clone(&local.done);

        self.pending.fetch_add(1, Ordering::SeqCst);
        self.futs.lock().await.push(AttemptFuture::Local(local));

        let this = Arc::clone(self);
        let filter = self.filter.clone();

        tokio::spawn(async move {
            let result = this
                .ctx
                .dht
                .lock_all_async(&this.ctx.local, req, &keys, filter)
                .await;

            let success = match result {
                Err(e) => {
                    this.on_error(LockError::from(e)).await;
                    false
                }
                Ok(res) => match &res.error {
                    Some(ResponseError::Timeout) => false,
                    Some(ResponseError::Failed(msg)) => {
                        this.on_error(LockError::Remote(msg.clone())).await;
                        false
                    }
                    None => {
                        match apply::apply_response(&this, &node, &keys, &res, ApplyMode::Local)
                            .await
                        {
                            Ok(()) => {
                                debug!(
                                    "Acquired lock for local DHT mapping [fut={}, keys={}]",
                                    this.fut_id,
                                    keys.len()
                                );
                                true
                            }
                            Err(e) => {
                                this.on_error(e).await;
                                false
                            }
                        }
                    }
                },
            };

            done.store(true, Ordering::SeqCst);
            this.on_child_done(success).await;
        });
    }

    /// One aggregated future finished.
    pub(crate) async fn on_child_done(self: &Arc<Self>, success: bool) {
        if !success {
            self.all_ok.store(false, Ordering::SeqCst);
        }

        if self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| p.checked_sub(1))
            .is_err()
        {
            // Completion raced ahead of the bookkeeping; nothing to do.
            return;
        }

        self.check_pending_complete().await;
    }

    async fn check_pending_complete(self: &Arc<Self>) {
        if self.is_done()
            || !self.initialized.load(Ordering::SeqCst)
            || self.pending.load(Ordering::SeqCst) > 0
        {
            return;
        }

        if self.all_ok.load(Ordering::SeqCst) {
            self.check_locks().await;
        } else {
            self.on_complete(false, true).await;
        }
    }

    /// Verify every enlisted entry is locked by this attempt; complete the
    /// future on success. No-op while responses are outstanding.
    pub async fn check_locks(self: &Arc<Self>) -> bool {
        if self.is_done()
            || !self.initialized.load(Ordering::SeqCst)
            || self.pending.load(Ordering::SeqCst) > 0
        {
            return false;
        }

        let len = self.entries.lock().await.len();
        for i in 0..len {
            let mut entry = match self.entries.lock().await.get(i) {
                Some(entry) => Arc::clone(entry),
                None => break,
            };

            loop {
                match entry
                    .locked_locally_by(&self.lock_ver.id, self.thread_id)
                    .await
                {
                    Ok(true) => {
                        let snapshot = entry.wrap().await;
                        if !self.filter_pass(&snapshot) {
                            debug!(
                                "Filter didn't pass for entry (will fail lock) [key={}]",
                                entry.key()
                            );
                            self.on_failed(true).await;
                            return false;
                        }
                        break;
                    }
                    Ok(false) => {
                        debug!(
                            "Lock is still not acquired for entry (will keep waiting) [key={}, fut={}]",
                            entry.key(),
                            self.fut_id
                        );
                        return false;
                    }
                    Err(EntryError::Removed(_)) => {
                        debug!(
                            "Got removed entry while checking locks (will retry) [key={}]",
                            entry.key()
                        );
                        let fresh = self.ctx.store.entry_exx(entry.key()).await;
                        {
                            let mut entries = self.entries.lock().await;
                            if let Some(slot) = entries.get_mut(i) {
                                *slot = Arc::clone(&fresh);
                            }
                        }
                        entry = fresh;
                    }
                }
            }
        }

        debug!("Local lock acquired for entries [fut={}]", self.fut_id);
        self.on_complete(true, true).await
    }

    /// Entry lock ownership changed. Completes the attempt when the new
    /// owner is this attempt's candidate.
    pub async fn on_owner_changed(
        self: &Arc<Self>,
        _entry: &Arc<NearEntry>,
        owner: Option<LockCandidate>,
    ) -> bool {
        if let Some(owner) = owner {
            if owner.ver == self.lock_ver {
                self.on_done_success().await;
                return true;
            }
        }
        false
    }

    async fn on_done_success(self: &Arc<Self>) {
        if self.is_done() {
            return;
        }
        if self.ec() {
            self.on_complete(true, true).await;
        } else {
            self.check_locks().await;
        }
    }

    /// A cluster member left. Returns false when no request is outstanding
    /// on it.
    pub async fn on_node_left(self: &Arc<Self>, node: NodeId) -> bool {
        let mini = {
            let futs = self.futs.lock().await;
            futs.iter()
                .filter(|f| !f.is_done())
                .find_map(|f| match f {
                    AttemptFuture::Remote(mini) if mini.node().id == node => {
                        Some(Arc::clone(mini))
                    }
                    _ => None,
                })
        };

        match mini {
            Some(mini) => {
                debug!(
                    "Found mini-future for left node [node={}, fut={}]",
                    node, self.fut_id
                );
                mini.on_peer_left("Remote node left grid (will retry)").await;
                true
            }
            None => {
                debug!(
                    "Near lock future does not have mapping for left node (ignoring) [node={}, fut={}]",
                    node, self.fut_id
                );
                false
            }
        }
    }

    /// Route a lock response to the per-peer future that requested it.
    pub async fn on_response(self: &Arc<Self>, sender: NodeId, res: LockResponse) {
        if self.is_done() {
            debug!(
                "Ignoring lock response from node (future is done) [node={}, fut={}]",
                sender, self.fut_id
            );
            return;
        }

        let mini = {
            let futs = self.futs.lock().await;
            futs.iter().find_map(|f| match f {
                AttemptFuture::Remote(mini) if mini.mini_id() == res.mini_id => {
                    Some(Arc::clone(mini))
                }
                _ => None,
            })
        };

        match mini {
            Some(mini) => {
                debug!(
                    "Found mini future for response [mini={}, node={}]",
                    res.mini_id, sender
                );
                mini.on_response(res).await;
            }
            None => warn!(
                "Failed to find mini future for response (perhaps due to stale message) [mini={}, fut={}]",
                res.mini_id, self.fut_id
            ),
        }
    }

    /// Record the first non-sentinel error and drive the attempt to
    /// failure.
    pub(crate) async fn on_error(self: &Arc<Self>, err: LockError) {
        let should_complete = {
            let mut slot = self.err.lock().await;
            if slot.is_none() {
                if !err.is_timeout() {
                    *slot = Some(err);
                }
                true
            } else {
                false
            }
        };

        if should_complete {
            self.on_complete(false, true).await;
        }
    }

    /// Undo local enlistments and fail the attempt.
    pub(crate) async fn on_failed(self: &Arc<Self>, distribute: bool) {
        self.undo_locks(distribute).await;
        self.on_complete(false, true).await;
    }

    /// Remove this attempt's candidate from every enlisted entry; when
    /// `distribute` is set and no transaction encloses the attempt, ask
    /// remote primaries to release as well. Transactions release on their
    /// own rollback path and are only marked rollback-only here.
    async fn undo_locks(&self, distribute: bool) {
        if distribute && self.tx.is_none() {
            self.ctx.remove_locks(&self.lock_ver, &self.keys).await;
            return;
        }

        if let Some(tx) = &self.tx {
            if tx.set_rollback_only() {
                debug!(
                    "Marked transaction as rollback only because locks could not be acquired [xid={}]",
                    tx.xid_ver()
                );
            } else {
                debug!(
                    "Transaction was not marked rollback-only while locks were not acquired [xid={}]",
                    tx.xid_ver()
                );
            }
        }

        for entry in self.entries_copy().await {
            let mut entry = entry;
            loop {
                match entry.remove_lock(&self.lock_ver).await {
                    Ok(_) => break,
                    Err(EntryError::Removed(_)) => {
                        debug!(
                            "Attempted to remove lock on removed entry (will retry) [ver={}, key={}]",
                            self.lock_ver,
                            entry.key()
                        );
                        match self.ctx.store.peek(entry.key()).await {
                            Some(fresh) => entry = fresh,
                            None => break,
                        }
                    }
                }
            }
        }
    }

    /// Terminal completion. Exactly one caller wins; the winner cleans up
    /// registrations and wakes waiters.
    pub(crate) async fn on_complete(self: &Arc<Self>, success: bool, distribute: bool) -> bool {
        debug!(
            "Received on_complete callback [success={}, distribute={}, fut={}]",
            success, distribute, self.fut_id
        );

        if !success {
            self.undo_locks(distribute).await;
        }

        if let Some(tx) = &self.tx {
            self.ctx.tm.tx_context(tx).await;
        }

        let err = {
            let slot = self.err.lock().await;
            match slot.clone() {
                Some(e) => Some(e),
                None if self.cancelled.load(Ordering::SeqCst) => Some(LockError::Cancelled),
                None => None,
            }
        };
        let success = success && err.is_none();

        let won = {
            let mut outcome = self.outcome.lock().await;
            if outcome.is_none() {
                *outcome = Some(match err {
                    Some(e) => Err(e),
                    None => Ok(success),
                });
                self.done.store(true, Ordering::SeqCst);
                true
            } else {
                false
            }
        };

        if !won {
            return false;
        }

        debug!("Completing lock future [fut={}, success={}]", self.fut_id, success);

        self.ctx.mvcc.remove_future(&self.fut_id).await;

        let timeout_obj = self.timeout_obj.lock().await.take();
        if let Some(obj) = timeout_obj {
            self.ctx
                .timeouts
                .remove_timeout_object(&TimeoutObject::timeout_id(obj.as_ref()))
                .await;
        }

        self.done_notify.notify_waiters();
        true
    }
}

/// Timeout binding of one lock attempt.
pub(crate) struct LockTimeoutObject {
    parent: Weak<NearLockFuture>,
    id: Uuid,
    end_time: i64,
}

impl LockTimeoutObject {
    fn new(parent: &Arc<NearLockFuture>) -> Self {
        let end = Utc::now()
            .timestamp_millis()
            .checked_add(parent.timeout_ms)
            .unwrap_or(i64::MAX);

        Self {
            parent: Arc::downgrade(parent),
            // The lock version uuid makes ownership of the registration
            // unambiguous.
            id: parent.lock_ver.id,
            // Account for overflow.
            end_time: if end < 0 { i64::MAX } else { end },
        }
    }
}

#[async_trait]
impl TimeoutObject for LockTimeoutObject {
    fn timeout_id(&self) -> Uuid {
        self.id
    }

    fn end_time(&self) -> i64 {
        self.end_time
    }

    async fn on_timeout(&self) {
        if let Some(fut) = self.parent.upgrade() {
            debug!("Timed out waiting for lock response [fut={}]", fut.fut_id());
            fut.set_timed_out();
            fut.on_complete(false, true).await;
        }
    }
}
