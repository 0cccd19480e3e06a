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

//! Per-peer futures aggregated by a compound lock attempt.
//!
//! A [`MiniFuture`] tracks the outstanding request to one remote primary.
//! It consumes exactly one terminal event: the peer's response, an error,
//! or the peer leaving the cluster. The `received` flag is a single-shot
//! gate; late events are logged and dropped.
//!
//! Requests served by the local primary are tracked as
//! [`AttemptFuture::Local`], a handle over the embedded task driving the
//! DHT shortcut.

use crate::apply::{self, ApplyMode};
use crate::error::LockError;
use crate::future::NearLockFuture;
use plexcache_core::{Key, NodeRef};
use plexcache_transport::{LockResponse, ResponseError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// One future aggregated by a compound lock attempt.
pub(crate) enum AttemptFuture {
    /// Embedded local-primary shortcut.
    Local(LocalFuture),
    /// Outstanding request to a remote primary.
    Remote(Arc<MiniFuture>),
}

impl AttemptFuture {
    /// Node this future waits on.
    pub(crate) fn node(&self) -> &NodeRef {
        match self {
            AttemptFuture::Local(f) => &f.node,
            AttemptFuture::Remote(f) => f.node(),
        }
    }

    /// True when the future consumed its terminal event.
    pub(crate) fn is_done(&self) -> bool {
        match self {
            AttemptFuture::Local(f) => f.done.load(Ordering::SeqCst),
            AttemptFuture::Remote(f) => f.is_done(),
        }
    }
}

/// Handle over the task driving a local-primary shortcut.
#[derive(Clone)]
pub(crate) struct LocalFuture {
    pub(crate) node: NodeRef,
    pub(crate) done: Arc<AtomicBool>,
}

impl LocalFuture {
    pub(crate) fn new(node: NodeRef) -> Self {
        Self {
            node,
            done: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Future for the request sent to one remote primary.
pub(crate) struct MiniFuture {
    mini_id: Uuid,
    node: NodeRef,
    keys: Vec<Key>,
    received: AtomicBool,
    done: AtomicBool,
    parent: Weak<NearLockFuture>,
}

impl MiniFuture {
    pub(crate) fn new(parent: &Arc<NearLockFuture>, node: NodeRef, keys: Vec<Key>) -> Arc<Self> {
        Arc::new(Self {
            mini_id: Uuid::new_v4(),
            node,
            keys,
            received: AtomicBool::new(false),
            done: AtomicBool::new(false),
            parent: Arc::downgrade(parent),
        })
    }

    pub(crate) fn mini_id(&self) -> Uuid {
        self.mini_id
    }

    pub(crate) fn node(&self) -> &NodeRef {
        &self.node
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn consume(&self) -> bool {
        self.received
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Peer answered.
    pub(crate) async fn on_response(self: &Arc<Self>, res: LockResponse) {
        let parent = match self.parent.upgrade() {
            Some(parent) => parent,
            None => return,
        };

        if !self.consume() {
            warn!(
                "Received response after another result has been processed [node={}, mini={}]",
                self.node, self.mini_id
            );
            return;
        }

        if let Some(err) = &res.error {
            self.done.store(true, Ordering::SeqCst);
            match err {
                ResponseError::Timeout => {
                    debug!(
                        "Finishing mini future as unsuccessful due to lock timeout on peer [node={}]",
                        self.node
                    );
                    parent.on_child_done(false).await;
                }
                ResponseError::Failed(msg) => {
                    debug!(
                        "Finishing mini future with an error due to error in response [node={}, err={}]",
                        self.node, msg
                    );
                    parent.on_error(LockError::Remote(msg.clone())).await;
                }
            }
            return;
        }

        match apply::apply_response(&parent, &self.node, &self.keys, &res, ApplyMode::Remote)
            .await
        {
            Ok(()) => {
                self.done.store(true, Ordering::SeqCst);
                parent.on_child_done(true).await;
            }
            Err(e) => {
                self.done.store(true, Ordering::SeqCst);
                parent.on_error(e).await;
            }
        }
    }

    /// Request or response delivery failed.
    pub(crate) async fn on_error(self: &Arc<Self>, err: LockError) {
        let parent = match self.parent.upgrade() {
            Some(parent) => parent,
            None => return,
        };

        if !self.consume() {
            warn!(
                "Received error after another result has been processed [node={}, mini={}, err={}]",
                self.node, self.mini_id, err
            );
            return;
        }

        debug!(
            "Failed to get mini future result [node={}, err={}]",
            self.node, err
        );

        self.done.store(true, Ordering::SeqCst);
        if err.is_timeout() {
            parent.on_child_done(false).await;
        } else {
            parent.on_error(err).await;
        }
    }

    /// Peer left the cluster while the request was outstanding.
    pub(crate) async fn on_peer_left(self: &Arc<Self>, reason: &str) {
        let parent = match self.parent.upgrade() {
            Some(parent) => parent,
            None => return,
        };

        // Exclude the peer from every later mapping pass, even when this
        // event loses the terminal race.
        parent.add_left_node(&self.node).await;

        if parent.is_done() {
            return;
        }

        if !self.consume() {
            return;
        }

        debug!(
            "Remote node left grid while sending or waiting for reply (will remap and retry) [node={}, reason={}]",
            self.node, reason
        );

        if let Some(tx) = parent.tx() {
            tx.remove_mapping(self.node.id).await;
        }

        let prior = vec![(self.node.clone(), self.keys.clone())];
        Box::pin(parent.map_keys(&self.keys, &prior)).await;

        self.done.store(true, Ordering::SeqCst);
        parent.on_child_done(true).await;
    }
}
