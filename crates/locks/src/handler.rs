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

//! Per-node message handler.
//!
//! Serves inbound lock requests through the node's primary tier, routes
//! lock responses to their compound future, and honors release requests.

use crate::manager::CacheContext;
use async_trait::async_trait;
use plexcache_core::{Key, NodeId};
use plexcache_transport::{
    LockRequest, LockResponse, Message, MessageHandler, ResponseError,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Message handler wiring one node's cache tiers to the transport.
pub struct CacheIoHandler {
    ctx: Arc<CacheContext>,
}

impl CacheIoHandler {
    /// Create a handler over the node's context.
    pub fn new(ctx: Arc<CacheContext>) -> Arc<Self> {
        Arc::new(Self { ctx })
    }

    async fn handle_lock_request(&self, sender: NodeId, req: LockRequest) {
        let lock_ver = req.lock_ver;
        let fut_id = req.fut_id;
        let mini_id = req.mini_id;
        let keys: Vec<Key> = req.keys.iter().map(|b| b.key.clone()).collect();

        debug!(
            "Processing near lock request [sender={}, keys={}, ver={}]",
            sender,
            keys.len(),
            lock_ver
        );

        let res = match self
            .ctx
            .dht
            .lock_all_async(&self.ctx.local, req, &keys, None)
            .await
        {
            Ok(res) => res,
            Err(e) => {
                warn!(
                    "Failed to lock keys on primary [sender={}, err={}]",
                    sender, e
                );
                LockResponse::error(
                    lock_ver,
                    fut_id,
                    mini_id,
                    ResponseError::Failed(e.to_string()),
                )
            }
        };

        match self.ctx.topology.node(sender).await {
            Some(node) => {
                if let Err(e) = self
                    .ctx
                    .transport
                    .send(&node, Message::LockResponse(res))
                    .await
                {
                    debug!(
                        "Failed to send lock response (node left?) [node={}, err={}]",
                        node, e
                    );
                }
            }
            None => warn!(
                "Requester is no longer a cluster member (dropping lock response) [node={}]",
                sender
            ),
        }
    }

    async fn handle_lock_response(&self, sender: NodeId, res: LockResponse) {
        match self.ctx.mvcc.future(&res.fut_id).await {
            Some(fut) => fut.on_response(sender, res).await,
            None => warn!(
                "Failed to find future for lock response (perhaps due to stale message) [fut={}]",
                res.fut_id
            ),
        }
    }
}

#[async_trait]
impl MessageHandler for CacheIoHandler {
    async fn on_message(&self, sender: NodeId, message: Message) {
        match message {
            Message::LockRequest(req) => self.handle_lock_request(sender, req).await,
            Message::LockResponse(res) => self.handle_lock_response(sender, res).await,
            Message::LockRelease(rel) => {
                debug!(
                    "Processing lock release [sender={}, ver={}, keys={}]",
                    sender,
                    rel.lock_ver,
                    rel.keys.len()
                );
                self.ctx.dht.remove_locks(&rel.lock_ver, &rel.keys).await;
            }
        }
    }
}
