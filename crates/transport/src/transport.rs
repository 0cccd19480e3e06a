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

//! Transport trait and error types.

use crate::messages::Message;
use async_trait::async_trait;
use plexcache_core::{NodeId, NodeRef};
use thiserror::Error;

/// Errors that can occur during message delivery.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Destination node is no longer a cluster member
    #[error("Remote node left grid: {0}")]
    NodeLeft(String),

    /// Message could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Transport has been closed
    #[error("Transport closed: {0}")]
    Closed(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Receives messages delivered to a node.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound message.
    async fn on_message(&self, sender: NodeId, message: Message);
}

/// Delivers messages to named cluster nodes.
///
/// ## Purpose
/// Single send primitive shared by all backends. Delivery is asynchronous;
/// a successful send means the message was accepted for delivery, not that
/// the peer processed it.
///
/// ## Errors
/// - [`TransportError::NodeLeft`]: destination departed; lock futures
///   route this into their peer-left remap path.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to the given node.
    async fn send(&self, node: &NodeRef, message: Message) -> TransportResult<()>;
}
