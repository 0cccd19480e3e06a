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

//! In-memory primary tier.
//!
//! ## Purpose
//! Holds the authoritative replica of locally-owned keys: value, value
//! bytes and the authoritative version, plus a single-holder lock slot per
//! entry with a waiter queue.
//!
//! ## Lock semantics
//! - A free entry is granted immediately; re-grants for the same lock
//!   version or owner thread are reentries.
//! - Contended requests wait for a release within the request timeout.
//!   Zero timeout waits indefinitely; negative fails immediately. Lock
//!   wait expiry answers with the timeout sentinel, not an error.
//! - Keys are granted in request order; on any failure every grant already
//!   made for the request is released before responding.
//!
//! ## Value return
//! A key's value is included in the response when the requester asked for
//! it or when the version it reported is stale. Otherwise only the version
//! travels and the near side reuses its locally-observed value.

use crate::error::{DhtError, DhtResult};
use crate::tier::DhtTier;
use async_trait::async_trait;
use plexcache_core::{
    CacheValue, CacheVersion, DhtEntrySnapshot, Key, NodeRef, VersionClock, VersionedValue,
};
use plexcache_nearcache::{EntryFilter, EntrySnapshot};
use plexcache_transport::{KeyLockValue, LockRequest, LockResponse, ResponseError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

struct DhtLock {
    ver: CacheVersion,
    thread_id: u64,
}

struct DhtEntry {
    value: Option<CacheValue>,
    value_bytes: Option<Vec<u8>>,
    ver: CacheVersion,
    lock: Option<DhtLock>,
    waiting: Vec<CacheVersion>,
}

enum Attempt {
    Granted(KeyLockValue, Vec<CacheVersion>),
    Held,
    Rejected(Key),
}

/// In-memory primary tier for one node.
pub struct LocalDhtTier {
    node: NodeRef,
    clock: Arc<VersionClock>,
    entries: Mutex<HashMap<Key, DhtEntry>>,
    released: Notify,
    committed: Mutex<Vec<CacheVersion>>,
    rolled_back: Mutex<Vec<CacheVersion>>,
}

impl LocalDhtTier {
    /// Create an empty primary tier for the node.
    pub fn new(node: NodeRef, clock: Arc<VersionClock>) -> Arc<Self> {
        Arc::new(Self {
            node,
            clock,
            entries: Mutex::new(HashMap::new()),
            released: Notify::new(),
            committed: Mutex::new(Vec::new()),
            rolled_back: Mutex::new(Vec::new()),
        })
    }

    /// Store a value, stamping a fresh authoritative version.
    pub async fn put(&self, key: &Key, value: CacheValue) -> DhtResult<CacheVersion> {
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| DhtError::SerializationError(e.to_string()))?;

        let mut entries = self.entries.lock().await;
        let ver = self.clock.next();
        let entry = entries.entry(key.clone()).or_insert_with(|| DhtEntry {
            value: None,
            value_bytes: None,
            ver,
            lock: None,
            waiting: Vec::new(),
        });
        entry.value = Some(value);
        entry.value_bytes = Some(bytes);
        entry.ver = ver;

        Ok(ver)
    }

    /// Version holding the entry lock, when locked.
    pub async fn lock_owner(&self, key: &Key) -> Option<CacheVersion> {
        self.entries
            .lock()
            .await
            .get(key)
            .and_then(|e| e.lock.as_ref().map(|l| l.ver))
    }

    /// Record a version as committed on this primary.
    pub async fn commit_version(&self, ver: CacheVersion) {
        self.committed.lock().await.push(ver);
    }

    /// Record a version as rolled back and release its locks.
    pub async fn rollback_version(&self, ver: CacheVersion) {
        self.rolled_back.lock().await.push(ver);

        let mut entries = self.entries.lock().await;
        for entry in entries.values_mut() {
            if entry.lock.as_ref().map(|l| l.ver == ver).unwrap_or(false) {
                entry.lock = None;
            }
            entry.waiting.retain(|v| *v != ver);
        }
        drop(entries);
        self.released.notify_waiters();
    }

    async fn release_keys(&self, lock_ver: &CacheVersion, keys: &[Key]) {
        let mut entries = self.entries.lock().await;
        for key in keys {
            if let Some(entry) = entries.get_mut(key) {
                if entry
                    .lock
                    .as_ref()
                    .map(|l| l.ver == *lock_ver)
                    .unwrap_or(false)
                {
                    entry.lock = None;
                }
                entry.waiting.retain(|v| *v != *lock_ver);
            }
        }
        drop(entries);
        self.released.notify_waiters();
    }

    fn try_grant(
        &self,
        entries: &mut HashMap<Key, DhtEntry>,
        req: &LockRequest,
        block_idx: usize,
        filter: &Option<EntryFilter>,
    ) -> Attempt {
        let block = &req.keys[block_idx];
        let entry = entries.entry(block.key.clone()).or_insert_with(|| DhtEntry {
            value: None,
            value_bytes: None,
            ver: self.clock.next(),
            lock: None,
            waiting: Vec::new(),
        });

        if let Some(f) = filter {
            let snapshot = EntrySnapshot {
                key: block.key.clone(),
                value: entry.value.clone(),
                dht_ver: Some(entry.ver),
                has_owner: entry.lock.is_some(),
            };
            if !f(&snapshot) {
                return Attempt::Rejected(block.key.clone());
            }
        }

        let grantable = entry
            .lock
            .as_ref()
            .map(|l| l.ver == req.lock_ver || l.thread_id == req.thread_id)
            .unwrap_or(true);

        if grantable {
            entry.lock = Some(DhtLock {
                ver: req.lock_ver,
                thread_id: req.thread_id,
            });
            entry.waiting.retain(|v| *v != req.lock_ver);

            let stale = block.dht_ver != Some(entry.ver);
            let include = block.want_return || stale;

            Attempt::Granted(
                KeyLockValue {
                    value: if include { entry.value.clone() } else { None },
                    value_bytes: if include {
                        entry.value_bytes.clone()
                    } else {
                        None
                    },
                    dht_ver: Some(entry.ver),
                },
                entry.waiting.clone(),
            )
        } else {
            if !entry.waiting.contains(&req.lock_ver) {
                entry.waiting.push(req.lock_ver);
            }
            Attempt::Held
        }
    }
}

#[async_trait]
impl DhtTier for LocalDhtTier {
    async fn peek_exx(&self, key: &Key) -> Option<DhtEntrySnapshot> {
        self.entries.lock().await.get(key).map(|e| DhtEntrySnapshot {
            key: key.clone(),
            versioned: VersionedValue::new(e.ver, e.value.clone(), e.value_bytes.clone()),
        })
    }

    async fn lock_all_async(
        &self,
        local_node: &NodeRef,
        req: LockRequest,
        keys: &[Key],
        filter: Option<EntryFilter>,
    ) -> DhtResult<LockResponse> {
        debug!(
            "Locking keys on primary [primary={}, requester={}, keys={}]",
            self.node,
            local_node,
            keys.len()
        );

        let deadline = if req.timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(req.timeout_ms as u64))
        } else {
            None
        };

        let mut key_vals: Vec<KeyLockValue> = Vec::with_capacity(req.keys.len());
        let mut pending: Vec<CacheVersion> = Vec::new();
        let mut granted: Vec<Key> = Vec::new();

        for i in 0..req.keys.len() {
            loop {
                // Register interest in releases before checking, so a
                // release between check and wait cannot be missed.
                let notified = self.released.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let attempt = {
                    let mut entries = self.entries.lock().await;
                    self.try_grant(&mut entries, &req, i, &filter)
                };

                match attempt {
                    Attempt::Granted(kv, others) => {
                        granted.push(req.keys[i].key.clone());
                        key_vals.push(kv);
                        for v in others {
                            if !pending.contains(&v) {
                                pending.push(v);
                            }
                        }
                        break;
                    }
                    Attempt::Rejected(key) => {
                        self.release_keys(&req.lock_ver, &granted).await;
                        debug!(
                            "Entry did not pass filter on primary (will not lock) [key={}]",
                            key
                        );
                        return Ok(LockResponse::error(
                            req.lock_ver,
                            req.fut_id,
                            req.mini_id,
                            ResponseError::Failed(format!(
                                "Filter rejected on primary for key: {key}"
                            )),
                        ));
                    }
                    Attempt::Held => {
                        if req.timeout_ms < 0 {
                            self.release_keys(&req.lock_ver, &granted).await;
                            debug!(
                                "Lock not available with negative timeout [key={}]",
                                req.keys[i].key
                            );
                            return Ok(LockResponse::error(
                                req.lock_ver,
                                req.fut_id,
                                req.mini_id,
                                ResponseError::Timeout,
                            ));
                        }

                        match deadline {
                            None => notified.await,
                            Some(deadline) => {
                                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                                    self.release_keys(&req.lock_ver, &granted).await;
                                    debug!(
                                        "Timed out waiting for primary lock [key={}]",
                                        req.keys[i].key
                                    );
                                    return Ok(LockResponse::error(
                                        req.lock_ver,
                                        req.fut_id,
                                        req.mini_id,
                                        ResponseError::Timeout,
                                    ));
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(LockResponse {
            lock_ver: req.lock_ver,
            fut_id: req.fut_id,
            mini_id: req.mini_id,
            error: None,
            keys: key_vals,
            pending,
            committed: self.committed.lock().await.clone(),
            rolled_back: self.rolled_back.lock().await.clone(),
        })
    }

    async fn remove_locks(&self, lock_ver: &CacheVersion, keys: &[Key]) {
        debug!(
            "Releasing primary locks [ver={}, keys={}]",
            lock_ver,
            keys.len()
        );
        self.release_keys(lock_ver, keys).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcache_core::NodeId;
    use plexcache_transport::KeyLockBlock;
    use serde_json::json;
    use uuid::Uuid;

    fn node(name: &str) -> NodeRef {
        NodeRef::new(NodeId::random(), name, 1)
    }

    fn request(
        keys: &[&str],
        lock_ver: CacheVersion,
        thread_id: u64,
        timeout_ms: i64,
    ) -> LockRequest {
        LockRequest {
            top_ver: 1,
            sender: NodeId::random(),
            thread_id,
            fut_id: Uuid::new_v4(),
            lock_ver,
            in_tx: false,
            implicit_tx: false,
            implicit_single_tx: false,
            read: false,
            isolation: None,
            invalidate: false,
            timeout_ms,
            sync_commit: false,
            sync_rollback: false,
            mini_id: Uuid::new_v4(),
            keys: keys
                .iter()
                .map(|k| KeyLockBlock {
                    key: k.to_string(),
                    key_bytes: None,
                    want_return: false,
                    candidates: Vec::new(),
                    dht_ver: None,
                })
                .collect(),
            has_filter: false,
        }
    }

    #[tokio::test]
    async fn test_grant_and_release() {
        let local = node("local");
        let dht = LocalDhtTier::new(node("primary"), Arc::new(VersionClock::new()));
        let ver = CacheVersion::new(100);

        let res = dht
            .lock_all_async(&local, request(&["k1"], ver, 1, 1000), &["k1".to_string()], None)
            .await
            .unwrap();
        assert!(res.error.is_none());
        assert_eq!(res.keys.len(), 1);
        assert!(res.keys[0].dht_ver.is_some());
        assert_eq!(dht.lock_owner(&"k1".to_string()).await, Some(ver));

        dht.remove_locks(&ver, &["k1".to_string()]).await;
        assert!(dht.lock_owner(&"k1".to_string()).await.is_none());
        // Idempotent.
        dht.remove_locks(&ver, &["k1".to_string()]).await;
    }

    #[tokio::test]
    async fn test_reentry_same_thread() {
        let local = node("local");
        let dht = LocalDhtTier::new(node("primary"), Arc::new(VersionClock::new()));

        let first = CacheVersion::new(100);
        dht.lock_all_async(&local, request(&["k1"], first, 1, 1000), &["k1".to_string()], None)
            .await
            .unwrap();

        let second = CacheVersion::new(101);
        let res = dht
            .lock_all_async(&local, request(&["k1"], second, 1, 1000), &["k1".to_string()], None)
            .await
            .unwrap();
        assert!(res.error.is_none());
        assert_eq!(dht.lock_owner(&"k1".to_string()).await, Some(second));
    }

    #[tokio::test]
    async fn test_negative_timeout_fails_fast() {
        let local = node("local");
        let dht = LocalDhtTier::new(node("primary"), Arc::new(VersionClock::new()));

        dht.lock_all_async(
            &local,
            request(&["k1"], CacheVersion::new(100), 1, 1000),
            &["k1".to_string()],
            None,
        )
        .await
        .unwrap();

        let res = dht
            .lock_all_async(
                &local,
                request(&["k1"], CacheVersion::new(101), 2, -1),
                &["k1".to_string()],
                None,
            )
            .await
            .unwrap();
        assert_eq!(res.error, Some(ResponseError::Timeout));
    }

    #[tokio::test]
    async fn test_contended_wait_until_release() {
        let local = node("local");
        let dht = LocalDhtTier::new(node("primary"), Arc::new(VersionClock::new()));

        let held = CacheVersion::new(100);
        dht.lock_all_async(&local, request(&["k1"], held, 1, 1000), &["k1".to_string()], None)
            .await
            .unwrap();

        let waiter = {
            let dht = Arc::clone(&dht);
            let local = local.clone();
            tokio::spawn(async move {
                dht.lock_all_async(
                    &local,
                    request(&["k1"], CacheVersion::new(101), 2, 2000),
                    &["k1".to_string()],
                    None,
                )
                .await
                .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        dht.remove_locks(&held, &["k1".to_string()]).await;

        let res = waiter.await.unwrap();
        assert!(res.error.is_none());
    }

    #[tokio::test]
    async fn test_wait_timeout_releases_earlier_grants() {
        let local = node("local");
        let dht = LocalDhtTier::new(node("primary"), Arc::new(VersionClock::new()));

        // Hold k2 under another thread so the second key blocks.
        dht.lock_all_async(
            &local,
            request(&["k2"], CacheVersion::new(100), 9, 1000),
            &["k2".to_string()],
            None,
        )
        .await
        .unwrap();

        let attempt = CacheVersion::new(101);
        let res = dht
            .lock_all_async(
                &local,
                request(&["k1", "k2"], attempt, 1, 50),
                &["k1".to_string(), "k2".to_string()],
                None,
            )
            .await
            .unwrap();

        assert_eq!(res.error, Some(ResponseError::Timeout));
        // The k1 grant was undone.
        assert!(dht.lock_owner(&"k1".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn test_value_inclusion_rules() {
        let local = node("local");
        let dht = LocalDhtTier::new(node("primary"), Arc::new(VersionClock::new()));
        let ver = dht.put(&"k1".to_string(), json!("v")).await.unwrap();

        // Requester already has the current version: only the version travels.
        let mut req = request(&["k1"], CacheVersion::new(100), 1, 1000);
        req.keys[0].dht_ver = Some(ver);
        let res = dht
            .lock_all_async(&local, req, &["k1".to_string()], None)
            .await
            .unwrap();
        assert!(res.keys[0].value.is_none());
        assert_eq!(res.keys[0].dht_ver, Some(ver));

        dht.remove_locks(&CacheVersion::new(100), &["k1".to_string()])
            .await;

        // Stale version: the value travels.
        let res = dht
            .lock_all_async(
                &local,
                request(&["k1"], CacheVersion::new(101), 2, 1000),
                &["k1".to_string()],
                None,
            )
            .await
            .unwrap();
        assert_eq!(res.keys[0].value, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_filter_rejection_on_primary() {
        let local = node("local");
        let dht = LocalDhtTier::new(node("primary"), Arc::new(VersionClock::new()));
        dht.put(&"k1".to_string(), json!("v")).await.unwrap();

        let filter: EntryFilter = Arc::new(|_snapshot| false);
        let res = dht
            .lock_all_async(
                &local,
                request(&["k1"], CacheVersion::new(100), 1, 1000),
                &["k1".to_string()],
                Some(filter),
            )
            .await
            .unwrap();

        assert!(matches!(res.error, Some(ResponseError::Failed(_))));
        assert!(dht.lock_owner(&"k1".to_string()).await.is_none());
    }
}
