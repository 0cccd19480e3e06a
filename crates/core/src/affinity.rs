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

//! Key-to-node affinity.
//!
//! The affinity function orders candidate nodes for a key; the first
//! candidate is the primary. Results are deterministic for a given
//! `(key, node set)` pair so every node computes the same mapping.

use crate::node::NodeRef;
use crate::Key;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Maps keys onto an ordered list of candidate nodes.
pub trait AffinityFunction: Send + Sync {
    /// Ordered candidate nodes for the key within the given node set. The
    /// first entry is the primary; an empty result means no node can own
    /// the key.
    fn affinity(&self, key: &Key, nodes: &[NodeRef]) -> Vec<NodeRef>;
}

/// Primary node from an affinity candidate list.
pub fn primary(candidates: &[NodeRef]) -> Option<&NodeRef> {
    candidates.first()
}

/// Rendezvous (highest-random-weight) affinity.
///
/// Each node scores `hash(key, node_id)`; candidates are ordered by
/// descending score. Removing a node only remaps the keys it owned.
#[derive(Debug, Default)]
pub struct RendezvousAffinity;

impl RendezvousAffinity {
    fn score(key: &Key, node: &NodeRef) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        node.id.hash(&mut hasher);
        hasher.finish()
    }
}

impl AffinityFunction for RendezvousAffinity {
    fn affinity(&self, key: &Key, nodes: &[NodeRef]) -> Vec<NodeRef> {
        let mut scored: Vec<(u64, NodeRef)> = nodes
            .iter()
            .map(|n| (Self::score(key, n), n.clone()))
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

        scored.into_iter().map(|(_, n)| n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    fn nodes(n: usize) -> Vec<NodeRef> {
        (0..n)
            .map(|i| NodeRef::new(NodeId::random(), format!("node-{i}"), i as u64 + 1))
            .collect()
    }

    #[test]
    fn test_deterministic() {
        let affinity = RendezvousAffinity;
        let nodes = nodes(4);
        let key = "k1".to_string();

        let a = affinity.affinity(&key, &nodes);
        let b = affinity.affinity(&key, &nodes);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_removal_promotes_next_candidate() {
        let affinity = RendezvousAffinity;
        let nodes = nodes(4);
        let key = "k1".to_string();

        let full = affinity.affinity(&key, &nodes);
        let without_primary: Vec<NodeRef> = nodes
            .iter()
            .filter(|n| n.id != full[0].id)
            .cloned()
            .collect();

        let reduced = affinity.affinity(&key, &without_primary);
        assert_eq!(reduced[0], full[1]);
    }

    #[test]
    fn test_empty_node_set() {
        let affinity = RendezvousAffinity;
        let candidates = affinity.affinity(&"k1".to_string(), &[]);
        assert!(primary(&candidates).is_none());
    }
}
