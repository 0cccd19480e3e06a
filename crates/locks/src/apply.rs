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

//! Lock response application.
//!
//! Applies a primary's per-key results onto near entries, under the
//! protection of the just-acquired lock: installs the authoritative value
//! and version, acknowledges the candidate so it can take ownership, and
//! records read events where requested.
//!
//! When the primary omitted a value and the near side had already observed
//! the same version before locking, the locally-observed value is reused.

use crate::error::{LockError, LockResult};
use crate::future::NearLockFuture;
use plexcache_core::{Key, NodeRef};
use plexcache_nearcache::{CacheEvent, EntryError};
use plexcache_transport::LockResponse;
use std::sync::Arc;
use tracing::debug;

/// Which path produced the response being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApplyMode {
    /// Local-primary shortcut. The DHT tier on this node already emitted
    /// the read event unless the near side observed the same version.
    Local,
    /// Response from a remote primary.
    Remote,
}

pub(crate) async fn apply_response(
    fut: &Arc<NearLockFuture>,
    node: &NodeRef,
    keys: &[Key],
    res: &LockResponse,
    mode: ApplyMode,
) -> LockResult<()> {
    if res.keys.len() != keys.len() {
        return Err(LockError::InvalidResponse(format!(
            "Expected {} per-key results, got {}",
            keys.len(),
            res.keys.len()
        )));
    }

    let ctx = fut.ctx();
    let lock_ver = fut.lock_ver();
    let min_ver = fut.min_ver();

    for (i, key) in keys.iter().enumerate() {
        loop {
            let entry = ctx.store.entry_exx(key).await;

            let dht_ver = match res.keys[i].dht_ver {
                Some(ver) => ver,
                None => return Err(LockError::MissingDhtVersion(key.clone())),
            };

            let old_tup = fut.val_map_get(key).await;

            let mut old_val = entry.raw_get().await;
            let mut new_val = res.keys[i].value.clone();
            let mut new_bytes = res.keys[i].value_bytes.clone();

            // On the local node the DHT tier records the read itself
            // unless the near side already observed this exact version.
            let record = match mode {
                ApplyMode::Remote => fut.retval(),
                ApplyMode::Local => {
                    fut.retval()
                        && old_tup
                            .as_ref()
                            .map(|t| t.ver == dht_ver)
                            .unwrap_or(false)
                }
            };

            if new_val.is_none() {
                if let Some(tup) = &old_tup {
                    if tup.ver == dht_ver {
                        new_val = tup.val.clone();
                        new_bytes = tup.bytes.clone();
                    }
                    old_val = tup.val.clone();
                }
            }

            let applied: Result<(), EntryError> = async {
                entry
                    .reset_from_primary(
                        new_val.clone(),
                        new_bytes.clone(),
                        &lock_ver,
                        dht_ver,
                        node.id,
                    )
                    .await?;

                entry
                    .done_remote(
                        &lock_ver,
                        &min_ver,
                        &res.pending,
                        &res.committed,
                        &res.rolled_back,
                    )
                    .await?;

                Ok(())
            }
            .await;

            match applied {
                Err(EntryError::Removed(_)) => {
                    debug!(
                        "Failed to add candidates because entry was removed (will renew) [key={}]",
                        key
                    );
                    let fresh = ctx.store.entry_exx(key).await;
                    fut.replace_entry(key, fresh).await;
                    continue;
                }
                Ok(()) => {}
            }

            if record {
                ctx.events
                    .record(CacheEvent::ObjectRead {
                        key: key.clone(),
                        new_value: new_val.clone(),
                        old_value: old_val.clone(),
                    })
                    .await;
                entry.record_read(old_val.is_some()).await;
            }

            if fut.ec() {
                entry.recheck().await;
            }

            debug!("Processed response for entry [key={}, dhtVer={}]", key, dht_ver);
            break;
        }
    }

    Ok(())
}
