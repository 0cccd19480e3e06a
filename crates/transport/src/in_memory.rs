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

//! In-memory transport backend (for testing and single-process use).
//!
//! ## Design
//! - One [`MessageBus`] per simulated cluster; each node registers its
//!   handler and holds an [`InMemoryTransport`] bound to its identity.
//! - Messages round-trip through serde on delivery so the typed envelope
//!   stays wire-compatible with networked backends.
//! - Delivery runs on a spawned task, mirroring a receive callback thread;
//!   senders never re-enter their own lock state synchronously.
//! - `disconnect` unregisters a node so later sends fail with `NodeLeft`.

use crate::messages::Message;
use crate::transport::{MessageHandler, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use plexcache_core::{NodeId, NodeRef};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Shared in-process message bus.
pub struct MessageBus {
    nodes: RwLock<HashMap<NodeId, Arc<dyn MessageHandler>>>,
    delivered: AtomicU64,
}

impl MessageBus {
    /// Create an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            delivered: AtomicU64::new(0),
        })
    }

    /// Register a node's message handler.
    pub async fn register(&self, node: NodeId, handler: Arc<dyn MessageHandler>) {
        self.nodes.write().await.insert(node, handler);
    }

    /// Unregister a node. Later sends to it fail with `NodeLeft`.
    pub async fn disconnect(&self, node: NodeId) -> bool {
        self.nodes.write().await.remove(&node).is_some()
    }

    /// Number of messages accepted for delivery.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    async fn deliver(
        &self,
        from: NodeId,
        to: &NodeRef,
        message: Message,
    ) -> TransportResult<()> {
        let handler = self
            .nodes
            .read()
            .await
            .get(&to.id)
            .cloned()
            .ok_or_else(|| TransportError::NodeLeft(to.name.clone()))?;

        let bytes = serde_json::to_vec(&message)
            .map_err(|e| TransportError::SerializationError(e.to_string()))?;
        let decoded: Message = serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::SerializationError(e.to_string()))?;

        self.delivered.fetch_add(1, Ordering::SeqCst);
        debug!("Delivering message [from={}, to={}]", from, to);

        tokio::spawn(async move {
            handler.on_message(from, decoded).await;
        });

        Ok(())
    }
}

/// Transport handle bound to one node on an in-memory bus.
pub struct InMemoryTransport {
    bus: Arc<MessageBus>,
    local: NodeId,
}

impl InMemoryTransport {
    /// Create a transport for the given local node.
    pub fn new(bus: Arc<MessageBus>, local: NodeId) -> Self {
        Self { bus, local }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, node: &NodeRef, message: Message) -> TransportResult<()> {
        self.bus.deliver(self.local, node, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{LockReleaseRequest, Message};
    use plexcache_core::CacheVersion;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct RecordingHandler {
        messages: Mutex<Vec<(NodeId, Message)>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn on_message(&self, sender: NodeId, message: Message) {
            self.messages.lock().await.push((sender, message));
        }
    }

    fn release() -> Message {
        Message::LockRelease(LockReleaseRequest {
            lock_ver: CacheVersion::new(1),
            keys: vec!["k1".to_string()],
        })
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let bus = MessageBus::new();
        let a = NodeId::random();
        let b = NodeId::random();
        let handler = Arc::new(RecordingHandler {
            messages: Mutex::new(Vec::new()),
        });
        bus.register(b, handler.clone()).await;

        let transport = InMemoryTransport::new(bus.clone(), a);
        transport
            .send(&NodeRef::new(b, "node-b", 2), release())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let messages = handler.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, a);
        assert_eq!(bus.delivered(), 1);
    }

    #[tokio::test]
    async fn test_send_to_disconnected_node() {
        let bus = MessageBus::new();
        let a = NodeId::random();
        let b = NodeId::random();
        let handler = Arc::new(RecordingHandler {
            messages: Mutex::new(Vec::new()),
        });
        bus.register(b, handler).await;
        assert!(bus.disconnect(b).await);

        let transport = InMemoryTransport::new(bus, a);
        let err = transport
            .send(&NodeRef::new(b, "node-b", 2), release())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NodeLeft(_)));
    }
}
