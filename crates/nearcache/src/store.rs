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

//! Near-cache entry store.
//!
//! `entry_exx` always yields a live entry: an obsolete entry left behind
//! by eviction is replaced with a fresh one under the write lock. Callers
//! racing an eviction observe `EntryError::Removed` from entry operations
//! and refetch here.

use crate::entry::{NearEntry, OwnerChangeListener};
use plexcache_core::Key;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Store of near-cache entries on one node.
pub struct NearCacheStore {
    entries: RwLock<HashMap<Key, Arc<NearEntry>>>,
    listener: Arc<dyn OwnerChangeListener>,
}

impl NearCacheStore {
    /// Create an empty store. Ownership changes on its entries are fanned
    /// out through the given listener.
    pub fn new(listener: Arc<dyn OwnerChangeListener>) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            listener,
        })
    }

    /// Obtain the live entry for the key, creating or refreshing it.
    pub async fn entry_exx(&self, key: &Key) -> Arc<NearEntry> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key) {
                if !entry.is_obsolete().await {
                    return Arc::clone(entry);
                }
            }
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if !entry.is_obsolete().await {
                return Arc::clone(entry);
            }
        }

        let fresh = NearEntry::new(key.clone(), Arc::clone(&self.listener));
        entries.insert(key.clone(), Arc::clone(&fresh));
        fresh
    }

    /// Entry for the key, when present. Does not create.
    pub async fn peek(&self, key: &Key) -> Option<Arc<NearEntry>> {
        self.entries.read().await.get(key).cloned()
    }

    /// Evict the entry for the key. The entry is marked obsolete so
    /// in-flight operations retry against a fresh one.
    pub async fn evict(&self, key: &Key) -> bool {
        let entry = self.entries.write().await.remove(key);
        match entry {
            Some(entry) => {
                entry.mark_obsolete().await;
                debug!("Evicted near entry [key={}]", key);
                true
            }
            None => false,
        }
    }

    /// Keys currently present.
    pub async fn keys(&self) -> Vec<Key> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when no entries are present.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::NoopOwnerListener;

    #[tokio::test]
    async fn test_entry_exx_creates_and_reuses() {
        let store = NearCacheStore::new(Arc::new(NoopOwnerListener));
        let key = "k1".to_string();

        let a = store.entry_exx(&key).await;
        let b = store.entry_exx(&key).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_evicted_entry_replaced() {
        let store = NearCacheStore::new(Arc::new(NoopOwnerListener));
        let key = "k1".to_string();

        let a = store.entry_exx(&key).await;
        assert!(store.evict(&key).await);
        assert!(a.is_obsolete().await);
        assert!(store.peek(&key).await.is_none());

        let b = store.entry_exx(&key).await;
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!b.is_obsolete().await);
    }

    #[tokio::test]
    async fn test_evict_missing_key() {
        let store = NearCacheStore::new(Arc::new(NoopOwnerListener));
        assert!(!store.evict(&"missing".to_string()).await);
        assert!(store.is_empty().await);
    }
}
