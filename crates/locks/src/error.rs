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

//! Error types for lock acquisition.
//!
//! `Timeout` is a sentinel: a lock attempt that runs out of time resolves
//! to a plain `false` outcome, and the attempt's error slot never accepts
//! the sentinel.

use plexcache_core::Key;
use plexcache_dht::DhtError;
use plexcache_transport::TransportError;
use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during lock acquisition.
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// Lock wait expired. Sentinel: reported as an unsuccessful outcome,
    /// never surfaced as an error
    #[error("Timed out waiting for lock")]
    Timeout,

    /// Remap after a peer departure re-targeted a node that already held
    /// the key during this attempt
    #[error("Failed to remap key to a new node (key got remapped to the same node) [key={key}, node={node}]")]
    RemapToSameNode {
        /// Key being remapped.
        key: Key,
        /// Node the key was remapped back to.
        node: String,
    },

    /// No node can own the key at the mapped topology
    #[error("Failed to map key to any node: {0}")]
    NoPrimary(Key),

    /// Primary answered without a DHT version for a key
    #[error("Failed to receive DHT version from remote node (will fail the lock): {0}")]
    MissingDhtVersion(Key),

    /// Response shape does not match the request
    #[error("Invalid lock response: {0}")]
    InvalidResponse(String),

    /// Peer left the cluster
    #[error("Remote node left grid: {0}")]
    NodeLeft(String),

    /// Message delivery failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request or key marshalling failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Primary tier failure
    #[error("DHT tier error: {0}")]
    Dht(String),

    /// Primary reported a failed acquisition
    #[error("Remote lock failed: {0}")]
    Remote(String),

    /// Attempt was cancelled by the caller
    #[error("Lock acquisition was cancelled")]
    Cancelled,
}

impl LockError {
    /// True for the timeout sentinel.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Timeout)
    }
}

impl From<TransportError> for LockError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NodeLeft(node) => LockError::NodeLeft(node),
            TransportError::SerializationError(msg) => LockError::SerializationError(msg),
            TransportError::Closed(msg) => LockError::Transport(msg),
        }
    }
}

impl From<DhtError> for LockError {
    fn from(err: DhtError) -> Self {
        LockError::Dht(err.to_string())
    }
}
