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

//! Near-cache entry.
//!
//! ## Purpose
//! One entry per key on the near tier: the last value reconciled from the
//! key's primary, its authoritative version, and the MVCC queue of lock
//! candidates. Entries become *obsolete* when evicted; operations on an
//! obsolete entry fail with [`EntryError::Removed`] and callers refetch
//! from the store.
//!
//! ## Concurrency
//! Entry state sits behind one async mutex. Owner-change notifications are
//! delivered after the state lock is released, so listeners may re-read
//! the entry.

use crate::error::{EntryError, EntryResult};
use crate::mvcc::{LockCandidate, MvccList};
use async_trait::async_trait;
use plexcache_core::{CacheValue, CacheVersion, Key, NodeId, VersionedValue};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Predicate over an entry snapshot. A lock attempt fails when its filter
/// rejects any enlisted entry.
pub type EntryFilter = Arc<dyn Fn(&EntrySnapshot) -> bool + Send + Sync>;

/// Point-in-time view of an entry, handed to filters and events.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    /// Entry key.
    pub key: Key,
    /// Current value, when any.
    pub value: Option<CacheValue>,
    /// Authoritative value version, when known.
    pub dht_ver: Option<CacheVersion>,
    /// True when a lock candidate holds the entry.
    pub has_owner: bool,
}

/// Observes lock ownership changes on near entries.
#[async_trait]
pub trait OwnerChangeListener: Send + Sync {
    /// Lock ownership of the entry changed to the given candidate.
    async fn on_owner_changed(&self, entry: &Arc<NearEntry>, owner: Option<LockCandidate>);
}

/// Listener that ignores ownership changes (for tests and tools).
pub struct NoopOwnerListener;

#[async_trait]
impl OwnerChangeListener for NoopOwnerListener {
    async fn on_owner_changed(&self, _entry: &Arc<NearEntry>, _owner: Option<LockCandidate>) {}
}

struct EntryState {
    value: Option<CacheValue>,
    value_bytes: Option<Vec<u8>>,
    dht_ver: Option<CacheVersion>,
    primary_node: Option<NodeId>,
    obsolete: bool,
    mvcc: MvccList,
    reads: u64,
    read_hits: u64,
}

/// Near-cache entry.
pub struct NearEntry {
    key: Key,
    state: Mutex<EntryState>,
    listener: Arc<dyn OwnerChangeListener>,
}

#[allow(clippy::too_many_arguments)]
impl NearEntry {
    /// Create an empty entry for the key.
    pub fn new(key: Key, listener: Arc<dyn OwnerChangeListener>) -> Arc<Self> {
        Arc::new(Self {
            key,
            state: Mutex::new(EntryState {
                value: None,
                value_bytes: None,
                dht_ver: None,
                primary_node: None,
                obsolete: false,
                mvcc: MvccList::default(),
                reads: 0,
                read_hits: 0,
            }),
            listener,
        })
    }

    /// Entry key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    fn check_obsolete(&self, state: &EntryState) -> EntryResult<()> {
        if state.obsolete {
            Err(EntryError::Removed(self.key.clone()))
        } else {
            Ok(())
        }
    }

    /// True when the entry was evicted.
    pub async fn is_obsolete(&self) -> bool {
        self.state.lock().await.obsolete
    }

    /// Mark the entry evicted. In-flight operations observe
    /// [`EntryError::Removed`] and retry against a fresh entry.
    pub async fn mark_obsolete(&self) {
        self.state.lock().await.obsolete = true;
    }

    /// Current value without any checks.
    pub async fn raw_get(&self) -> Option<CacheValue> {
        self.state.lock().await.value.clone()
    }

    /// Versioned value tuple, when the authoritative version is known.
    pub async fn versioned_value(&self) -> EntryResult<Option<VersionedValue>> {
        let state = self.state.lock().await;
        self.check_obsolete(&state)?;

        Ok(state.dht_ver.map(|ver| {
            VersionedValue::new(ver, state.value.clone(), state.value_bytes.clone())
        }))
    }

    /// Add a near-local lock candidate.
    ///
    /// Returns a reentry candidate when the thread is already queued, or
    /// `None` when acquisition cannot proceed without blocking and the
    /// attempt forbids it.
    pub async fn add_near_local(
        &self,
        node_id: NodeId,
        dht_node_id: NodeId,
        thread_id: u64,
        ver: CacheVersion,
        timeout_ms: i64,
        ec: bool,
        tx: bool,
        implicit_single: bool,
    ) -> EntryResult<Option<LockCandidate>> {
        let mut state = self.state.lock().await;
        self.check_obsolete(&state)?;

        Ok(state.mvcc.add_near_local(
            node_id,
            dht_node_id,
            thread_id,
            ver,
            timeout_ms,
            ec,
            tx,
            implicit_single,
        ))
    }

    /// Re-stamp the primary node on the candidate for the version. Used
    /// when a mapping pass re-targets an already-enlisted key.
    pub async fn dht_node_id(
        &self,
        ver: &CacheVersion,
        dht_node_id: NodeId,
    ) -> EntryResult<Option<LockCandidate>> {
        let mut state = self.state.lock().await;
        self.check_obsolete(&state)?;

        Ok(state.mvcc.set_dht_node_id(ver, dht_node_id))
    }

    /// Stamp the topology version on the candidate for the version.
    pub async fn candidate_topology(
        &self,
        ver: &CacheVersion,
        top_ver: i64,
    ) -> EntryResult<bool> {
        let mut state = self.state.lock().await;
        self.check_obsolete(&state)?;

        Ok(state.mvcc.set_topology_version(ver, top_ver))
    }

    /// Remove the lock candidate for the version. Idempotent.
    pub async fn remove_lock(self: &Arc<Self>, ver: &CacheVersion) -> EntryResult<bool> {
        let outcome = {
            let mut state = self.state.lock().await;
            self.check_obsolete(&state)?;
            state.mvcc.remove_lock(ver)
        };

        if outcome.removed && outcome.new_owner.is_some() {
            self.listener
                .on_owner_changed(self, outcome.new_owner.clone())
                .await;
        }

        Ok(outcome.removed)
    }

    /// True when the entry lock is held by the version id or the thread.
    pub async fn locked_locally_by(
        &self,
        ver_id: &Uuid,
        thread_id: u64,
    ) -> EntryResult<bool> {
        let state = self.state.lock().await;
        self.check_obsolete(&state)?;

        Ok(state.mvcc.locked_by(ver_id, thread_id))
    }

    /// True when a candidate for the version is queued.
    pub async fn has_lock_candidate(&self, ver: &CacheVersion) -> EntryResult<bool> {
        let state = self.state.lock().await;
        self.check_obsolete(&state)?;

        Ok(state.mvcc.has_candidate(ver))
    }

    /// Candidate currently holding the entry lock.
    pub async fn candidate_owner(&self) -> EntryResult<Option<LockCandidate>> {
        let state = self.state.lock().await;
        self.check_obsolete(&state)?;

        Ok(state.mvcc.owner().cloned())
    }

    /// Install the authoritative value returned by the primary. Called
    /// under the protection of the just-acquired lock.
    pub async fn reset_from_primary(
        &self,
        value: Option<CacheValue>,
        value_bytes: Option<Vec<u8>>,
        lock_ver: &CacheVersion,
        dht_ver: CacheVersion,
        primary: NodeId,
    ) -> EntryResult<()> {
        let mut state = self.state.lock().await;
        self.check_obsolete(&state)?;

        state.value = value;
        state.value_bytes = value_bytes;
        state.dht_ver = Some(dht_ver);
        state.primary_node = Some(primary);

        debug!(
            "Reset entry from primary [key={}, lockVer={}, dhtVer={}]",
            self.key, lock_ver, dht_ver
        );

        Ok(())
    }

    /// Apply the primary's acknowledgement for the version, possibly
    /// promoting its candidate into the owner position.
    pub async fn done_remote(
        self: &Arc<Self>,
        lock_ver: &CacheVersion,
        min_ver: &CacheVersion,
        pending: &[CacheVersion],
        committed: &[CacheVersion],
        rolled_back: &[CacheVersion],
    ) -> EntryResult<()> {
        let new_owner = {
            let mut state = self.state.lock().await;
            self.check_obsolete(&state)?;
            state
                .mvcc
                .done_remote(lock_ver, min_ver, pending, committed, rolled_back)
        };

        if let Some(owner) = new_owner {
            debug!(
                "Lock owner changed [key={}, owner={}]",
                self.key, owner.ver
            );
            self.listener.on_owner_changed(self, Some(owner)).await;
        }

        Ok(())
    }

    /// Revalidate the entry after an eventually-consistent write. A value
    /// with no authoritative version is dropped.
    pub async fn recheck(&self) {
        let mut state = self.state.lock().await;
        if state.dht_ver.is_none() && state.value.is_some() {
            debug!("Dropping unversioned value on recheck [key={}]", self.key);
            state.value = None;
            state.value_bytes = None;
        }
    }

    /// Point-in-time snapshot for filters and events.
    pub async fn wrap(&self) -> EntrySnapshot {
        let state = self.state.lock().await;
        EntrySnapshot {
            key: self.key.clone(),
            value: state.value.clone(),
            dht_ver: state.dht_ver,
            has_owner: state.mvcc.owner().is_some(),
        }
    }

    /// Bump the entry read metric.
    pub async fn record_read(&self, hit: bool) {
        let mut state = self.state.lock().await;
        state.reads += 1;
        if hit {
            state.read_hits += 1;
        }
    }

    /// Read metric: `(reads, hits)`.
    pub async fn reads(&self) -> (u64, u64) {
        let state = self.state.lock().await;
        (state.reads, state.read_hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str) -> Arc<NearEntry> {
        NearEntry::new(key.to_string(), Arc::new(NoopOwnerListener))
    }

    #[tokio::test]
    async fn test_obsolete_entry_rejects_operations() {
        let e = entry("k1");
        e.mark_obsolete().await;

        let err = e.versioned_value().await.unwrap_err();
        assert!(matches!(err, EntryError::Removed(_)));
        let err = e.remove_lock(&CacheVersion::new(1)).await.unwrap_err();
        assert!(matches!(err, EntryError::Removed(_)));
    }

    #[tokio::test]
    async fn test_reset_and_versioned_value() {
        let e = entry("k1");
        let lock_ver = CacheVersion::new(1);
        let dht_ver = CacheVersion::new(7);
        let primary = NodeId::random();

        e.reset_from_primary(
            Some(json!("v")),
            Some(b"\"v\"".to_vec()),
            &lock_ver,
            dht_ver,
            primary,
        )
        .await
        .unwrap();

        let versioned = e.versioned_value().await.unwrap().unwrap();
        assert_eq!(versioned.ver, dht_ver);
        assert_eq!(versioned.val, Some(json!("v")));
        assert_eq!(e.raw_get().await, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_lock_lifecycle() {
        let e = entry("k1");
        let node = NodeId::random();
        let ver = CacheVersion::new(3);

        let cand = e
            .add_near_local(node, node, 7, ver, 1000, false, false, false)
            .await
            .unwrap()
            .unwrap();
        assert!(!cand.reentry);
        assert!(!e.locked_locally_by(&ver.id, 7).await.unwrap());

        e.done_remote(&ver, &ver, &[], &[], &[]).await.unwrap();
        assert!(e.locked_locally_by(&ver.id, 7).await.unwrap());
        assert!(e.locked_locally_by(&Uuid::new_v4(), 7).await.unwrap());

        assert!(e.remove_lock(&ver).await.unwrap());
        assert!(!e.remove_lock(&ver).await.unwrap());
        assert!(!e.locked_locally_by(&ver.id, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_recheck_drops_unversioned_value() {
        let e = entry("k1");
        {
            let mut state = e.state.lock().await;
            state.value = Some(json!("stale"));
        }

        e.recheck().await;
        assert_eq!(e.raw_get().await, None);
    }

    #[tokio::test]
    async fn test_read_metrics() {
        let e = entry("k1");
        e.record_read(true).await;
        e.record_read(false).await;
        assert_eq!(e.reads().await, (2, 1));
    }
}
