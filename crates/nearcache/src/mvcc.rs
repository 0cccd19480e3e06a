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

//! Per-entry MVCC lock candidate queue.
//!
//! ## Purpose
//! Every near entry keeps an ordered queue of lock candidates, one per
//! outstanding lock attempt. At most one candidate per `(key, version)`
//! exists on a node; the candidate in the owner position holds the lock.
//!
//! ## Design
//! - A second request by the thread already queued yields a *reentry*
//!   candidate that aliases the existing one instead of growing the queue.
//! - Candidates become eligible for ownership only after the primary
//!   acknowledged them (`done_remote`); removal of the owner promotes the
//!   next acknowledged candidate.

use plexcache_core::{CacheVersion, NodeId};
use uuid::Uuid;

/// One lock candidate in an entry's MVCC queue.
#[derive(Debug, Clone, PartialEq)]
pub struct LockCandidate {
    /// Node that created the candidate.
    pub node_id: NodeId,
    /// Primary node the lock was requested from.
    pub dht_node_id: NodeId,
    /// Lock version of the owning attempt.
    pub ver: CacheVersion,
    /// Logical owner thread.
    pub thread_id: u64,
    /// Acquisition timeout of the attempt, in milliseconds.
    pub timeout_ms: i64,
    /// True when this is a reentry of an already-queued candidate.
    pub reentry: bool,
    /// Topology version the owning attempt mapped against.
    pub top_ver: i64,
    /// Eventually-consistent attempt.
    pub ec: bool,
    /// Candidate created inside a transaction.
    pub tx: bool,
    /// Candidate created by an implicit single-key transaction.
    pub implicit_single: bool,
    /// Candidate holds the entry lock.
    pub owner: bool,
    /// Primary acknowledged the candidate.
    pub used: bool,
}

/// Outcome of removing a lock candidate.
#[derive(Debug, Default)]
pub struct RemoveOutcome {
    /// True when a candidate was removed.
    pub removed: bool,
    /// Candidate promoted into the owner position, when any.
    pub new_owner: Option<LockCandidate>,
}

/// Ordered queue of lock candidates for one entry.
#[derive(Debug, Default)]
pub struct MvccList {
    cands: Vec<LockCandidate>,
}

#[allow(clippy::too_many_arguments)]
impl MvccList {
    /// Add a near-local candidate.
    ///
    /// Returns a reentry candidate when the thread (or version) is already
    /// queued. Returns `None` when the caller forbids blocking (negative
    /// timeout) and another thread already owns the entry lock.
    pub fn add_near_local(
        &mut self,
        node_id: NodeId,
        dht_node_id: NodeId,
        thread_id: u64,
        ver: CacheVersion,
        timeout_ms: i64,
        ec: bool,
        tx: bool,
        implicit_single: bool,
    ) -> Option<LockCandidate> {
        if let Some(existing) = self
            .cands
            .iter()
            .find(|c| c.ver == ver || c.thread_id == thread_id)
        {
            let mut reentry = existing.clone();
            reentry.reentry = true;
            return Some(reentry);
        }

        if timeout_ms < 0 {
            if let Some(owner) = self.owner() {
                if owner.thread_id != thread_id {
                    return None;
                }
            }
        }

        let cand = LockCandidate {
            node_id,
            dht_node_id,
            ver,
            thread_id,
            timeout_ms,
            reentry: false,
            top_ver: -1,
            ec,
            tx,
            implicit_single,
            owner: false,
            used: false,
        };
        self.cands.push(cand.clone());

        Some(cand)
    }

    /// Candidate holding the entry lock.
    pub fn owner(&self) -> Option<&LockCandidate> {
        self.cands.iter().find(|c| c.owner)
    }

    /// Candidate for the given version.
    pub fn candidate(&self, ver: &CacheVersion) -> Option<&LockCandidate> {
        self.cands.iter().find(|c| c.ver == *ver)
    }

    /// True when a candidate for the version is queued.
    pub fn has_candidate(&self, ver: &CacheVersion) -> bool {
        self.candidate(ver).is_some()
    }

    /// True when the owner matches the version id or the thread.
    pub fn locked_by(&self, ver_id: &Uuid, thread_id: u64) -> bool {
        self.owner()
            .map(|o| o.ver.id == *ver_id || o.thread_id == thread_id)
            .unwrap_or(false)
    }

    /// Re-stamp the primary node of the candidate for the version.
    pub fn set_dht_node_id(
        &mut self,
        ver: &CacheVersion,
        dht_node_id: NodeId,
    ) -> Option<LockCandidate> {
        let cand = self.cands.iter_mut().find(|c| c.ver == *ver)?;
        cand.dht_node_id = dht_node_id;
        Some(cand.clone())
    }

    /// Stamp the topology version on the candidate for the version.
    pub fn set_topology_version(&mut self, ver: &CacheVersion, top_ver: i64) -> bool {
        match self.cands.iter_mut().find(|c| c.ver == *ver) {
            Some(cand) => {
                cand.top_ver = top_ver;
                true
            }
            None => false,
        }
    }

    /// Remove the candidate for the version. Removing the owner promotes
    /// the next acknowledged candidate. Idempotent.
    pub fn remove_lock(&mut self, ver: &CacheVersion) -> RemoveOutcome {
        let pos = match self.cands.iter().position(|c| c.ver == *ver) {
            Some(pos) => pos,
            None => return RemoveOutcome::default(),
        };

        let removed = self.cands.remove(pos);
        let mut outcome = RemoveOutcome {
            removed: true,
            new_owner: None,
        };

        if removed.owner {
            if let Some(next) = self.cands.iter_mut().find(|c| c.used) {
                next.owner = true;
                outcome.new_owner = Some(next.clone());
            }
        }

        outcome
    }

    /// Apply the primary's acknowledgement for the version.
    ///
    /// Candidates rolled back on the primary are dropped. The acknowledged
    /// candidate moves into the owner position unless a pending version at
    /// or above the visibility floor still precedes it. Returns the new
    /// owner when ownership changed.
    pub fn done_remote(
        &mut self,
        ver: &CacheVersion,
        min_ver: &CacheVersion,
        pending: &[CacheVersion],
        committed: &[CacheVersion],
        rolled_back: &[CacheVersion],
    ) -> Option<LockCandidate> {
        self.cands.retain(|c| !rolled_back.contains(&c.ver));

        let cand_ver = {
            let cand = self.cands.iter_mut().find(|c| c.ver == *ver)?;
            cand.used = true;
            cand.ver
        };

        if self.owner().is_some() {
            return None;
        }

        let blocking = pending.iter().any(|p| {
            p.order >= min_ver.order
                && *p < cand_ver
                && !committed.contains(p)
                && !rolled_back.contains(p)
        });
        if blocking {
            return None;
        }

        let cand = self.cands.iter_mut().find(|c| c.ver == *ver)?;
        cand.owner = true;
        Some(cand.clone())
    }

    /// Number of queued candidates.
    pub fn len(&self) -> usize {
        self.cands.len()
    }

    /// True when no candidates are queued.
    pub fn is_empty(&self) -> bool {
        self.cands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ver(order: u64) -> CacheVersion {
        CacheVersion::new(order)
    }

    fn add(list: &mut MvccList, thread_id: u64, v: CacheVersion) -> Option<LockCandidate> {
        list.add_near_local(
            NodeId::random(),
            NodeId::random(),
            thread_id,
            v,
            1000,
            false,
            false,
            false,
        )
    }

    #[test]
    fn test_fresh_candidate() {
        let mut list = MvccList::default();
        let cand = add(&mut list, 1, ver(1)).unwrap();
        assert!(!cand.reentry);
        assert!(!cand.owner);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_reentry_by_thread_does_not_grow_queue() {
        let mut list = MvccList::default();
        let first = add(&mut list, 1, ver(1)).unwrap();

        let reentry = add(&mut list, 1, ver(2)).unwrap();
        assert!(reentry.reentry);
        assert_eq!(reentry.ver, first.ver);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_negative_timeout_contended() {
        let mut list = MvccList::default();
        let v1 = ver(1);
        add(&mut list, 1, v1).unwrap();
        list.done_remote(&v1, &v1, &[], &[], &[]).unwrap();

        let blocked = list.add_near_local(
            NodeId::random(),
            NodeId::random(),
            2,
            ver(2),
            -1,
            false,
            false,
            false,
        );
        assert!(blocked.is_none());
    }

    #[test]
    fn test_done_remote_promotes_owner() {
        let mut list = MvccList::default();
        let v1 = ver(1);
        add(&mut list, 1, v1).unwrap();

        let owner = list.done_remote(&v1, &v1, &[], &[], &[]).unwrap();
        assert!(owner.owner);
        assert!(list.locked_by(&v1.id, 99));
        assert!(list.locked_by(&uuid::Uuid::new_v4(), 1));
        assert!(!list.locked_by(&uuid::Uuid::new_v4(), 99));
    }

    #[test]
    fn test_done_remote_blocked_by_pending() {
        let mut list = MvccList::default();
        let v5 = ver(5);
        add(&mut list, 1, v5).unwrap();

        let earlier = ver(2);
        let floor = ver(1);
        assert!(list
            .done_remote(&v5, &floor, &[earlier], &[], &[])
            .is_none());
        assert!(list.owner().is_none());

        // The same pending version below the visibility floor is ignored.
        let mut list = MvccList::default();
        add(&mut list, 1, v5).unwrap();
        assert!(list
            .done_remote(&v5, &ver(3), &[earlier], &[], &[])
            .is_some());
    }

    #[test]
    fn test_rolled_back_candidates_dropped() {
        let mut list = MvccList::default();
        let v1 = ver(1);
        let v2 = ver(2);
        add(&mut list, 1, v1).unwrap();
        add(&mut list, 2, v2).unwrap();
        assert_eq!(list.len(), 2);

        let owner = list.done_remote(&v2, &v2, &[], &[], &[v1]).unwrap();
        assert_eq!(owner.ver, v2);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_remove_lock_idempotent() {
        let mut list = MvccList::default();
        let v1 = ver(1);
        add(&mut list, 1, v1).unwrap();
        list.done_remote(&v1, &v1, &[], &[], &[]).unwrap();

        assert!(list.remove_lock(&v1).removed);
        assert!(!list.remove_lock(&v1).removed);
        assert!(list.is_empty());
    }

    #[test]
    fn test_remove_owner_promotes_acknowledged() {
        let mut list = MvccList::default();
        let v1 = ver(1);
        let v2 = ver(2);
        add(&mut list, 1, v1).unwrap();
        add(&mut list, 2, v2).unwrap();

        list.done_remote(&v1, &v1, &[], &[], &[]).unwrap();
        // Second candidate acknowledged but not owner while first holds.
        assert!(list.done_remote(&v2, &v2, &[], &[], &[]).is_none());

        let outcome = list.remove_lock(&v1);
        assert!(outcome.removed);
        assert_eq!(outcome.new_owner.unwrap().ver, v2);
    }
}
