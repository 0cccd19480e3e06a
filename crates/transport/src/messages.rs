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

//! Lock protocol wire messages.
//!
//! A lock request bundles all keys mapped to one primary. The `mini_id`
//! correlates the response with the per-peer future that issued the
//! request inside one compound attempt.

use plexcache_core::{CacheValue, CacheVersion, Key, NodeId};
use plexcache_tx::TxIsolation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-key block of a lock request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyLockBlock {
    /// Key to lock.
    pub key: Key,
    /// Marshalled key bytes. Omitted for reentries and for requests served
    /// by the local node.
    pub key_bytes: Option<Vec<u8>>,
    /// True when the primary should return the current value.
    pub want_return: bool,
    /// Versions of candidates already known for this key on the sender.
    pub candidates: Vec<CacheVersion>,
    /// Value version already observed near-side, when any.
    pub dht_ver: Option<CacheVersion>,
}

/// Request to lock a group of keys on their primary node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    /// Topology version the mapping was computed against.
    pub top_ver: i64,
    /// Requesting node.
    pub sender: NodeId,
    /// Logical owner of the requested locks.
    pub thread_id: u64,
    /// Compound future id on the sender.
    pub fut_id: Uuid,
    /// Lock version of the attempt.
    pub lock_ver: CacheVersion,
    /// True when the attempt runs inside a transaction.
    pub in_tx: bool,
    /// True for implicit transactions.
    pub implicit_tx: bool,
    /// True for implicit single-key transactions.
    pub implicit_single_tx: bool,
    /// True for read locks.
    pub read: bool,
    /// Transaction isolation, when in a transaction.
    pub isolation: Option<TxIsolation>,
    /// True when the transaction invalidates instead of storing.
    pub invalidate: bool,
    /// Lock acquisition timeout in milliseconds.
    pub timeout_ms: i64,
    /// True when commit acknowledgements are synchronous.
    pub sync_commit: bool,
    /// True when rollback acknowledgements are synchronous.
    pub sync_rollback: bool,
    /// Correlates the response to one per-peer future.
    pub mini_id: Uuid,
    /// Per-key blocks, in mapping order.
    pub keys: Vec<KeyLockBlock>,
    /// True when the sender evaluates an entry filter for this attempt.
    pub has_filter: bool,
}

/// Per-key block of a lock response, index-aligned with the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyLockValue {
    /// Current value, when returned.
    pub value: Option<CacheValue>,
    /// Marshalled value bytes, when returned.
    pub value_bytes: Option<Vec<u8>>,
    /// Authoritative value version stamped by the primary.
    pub dht_ver: Option<CacheVersion>,
}

/// Failure reported inside a lock response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseError {
    /// Lock wait expired on the primary. This outcome is reported as a
    /// plain unsuccessful acquisition, never as an error.
    Timeout,
    /// Acquisition failed on the primary.
    Failed(String),
}

/// Response to a [`LockRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockResponse {
    /// Lock version of the attempt.
    pub lock_ver: CacheVersion,
    /// Compound future id on the requester.
    pub fut_id: Uuid,
    /// Per-peer future id the response answers.
    pub mini_id: Uuid,
    /// Failure, when the primary could not grant all keys.
    pub error: Option<ResponseError>,
    /// Per-key results, index-aligned with the request.
    pub keys: Vec<KeyLockValue>,
    /// Versions still pending on the responding primary.
    pub pending: Vec<CacheVersion>,
    /// Versions committed on the responding primary.
    pub committed: Vec<CacheVersion>,
    /// Versions rolled back on the responding primary.
    pub rolled_back: Vec<CacheVersion>,
}

impl LockResponse {
    /// Build an error response echoing the request's correlation ids.
    pub fn error(
        lock_ver: CacheVersion,
        fut_id: Uuid,
        mini_id: Uuid,
        error: ResponseError,
    ) -> Self {
        Self {
            lock_ver,
            fut_id,
            mini_id,
            error: Some(error),
            keys: Vec::new(),
            pending: Vec::new(),
            committed: Vec::new(),
            rolled_back: Vec::new(),
        }
    }
}

/// Request to release locks held under one lock version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockReleaseRequest {
    /// Lock version to release.
    pub lock_ver: CacheVersion,
    /// Keys to release.
    pub keys: Vec<Key>,
}

/// Envelope for every message the cache tiers exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Lock a group of keys on their primary.
    LockRequest(LockRequest),
    /// Answer to a lock request.
    LockResponse(LockResponse),
    /// Release locks held under a lock version.
    LockRelease(LockReleaseRequest),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let req = LockRequest {
            top_ver: 3,
            sender: NodeId::random(),
            thread_id: 7,
            fut_id: Uuid::new_v4(),
            lock_ver: CacheVersion::new(11),
            in_tx: false,
            implicit_tx: false,
            implicit_single_tx: false,
            read: false,
            isolation: None,
            invalidate: false,
            timeout_ms: 500,
            sync_commit: false,
            sync_rollback: false,
            mini_id: Uuid::new_v4(),
            keys: vec![KeyLockBlock {
                key: "k1".to_string(),
                key_bytes: Some(b"\"k1\"".to_vec()),
                want_return: true,
                candidates: Vec::new(),
                dht_ver: None,
            }],
            has_filter: false,
        };

        let bytes = serde_json::to_vec(&Message::LockRequest(req.clone())).unwrap();
        let decoded: Message = serde_json::from_slice(&bytes).unwrap();
        match decoded {
            Message::LockRequest(back) => {
                assert_eq!(back.fut_id, req.fut_id);
                assert_eq!(back.keys.len(), 1);
                assert_eq!(back.keys[0].key, "k1");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_error_response() {
        let res = LockResponse::error(
            CacheVersion::new(1),
            Uuid::new_v4(),
            Uuid::new_v4(),
            ResponseError::Timeout,
        );
        assert_eq!(res.error, Some(ResponseError::Timeout));
        assert!(res.keys.is_empty());
    }
}
