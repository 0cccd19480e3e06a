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

//! Cluster node identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a cluster node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random node id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying uuid.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a cluster member.
///
/// ## Purpose
/// Carries the identity, human-readable name and join order of a node.
/// The join order is assigned by the topology service and never reused,
/// so it doubles as a tie-breaker for deterministic orderings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    /// Node identity.
    pub id: NodeId,
    /// Human-readable node name (for logs and errors).
    pub name: String,
    /// Monotone join order within the cluster.
    pub order: u64,
}

impl NodeRef {
    /// Create a node reference.
    pub fn new(id: NodeId, name: impl Into<String>, order: u64) -> Self {
        Self {
            id,
            name: name.into(),
            order,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_uniqueness() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn test_node_ref_display() {
        let id = NodeId::random();
        let node = NodeRef::new(id, "node-1", 1);
        assert!(node.to_string().starts_with("node-1("));
    }
}
