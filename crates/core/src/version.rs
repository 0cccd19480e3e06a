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

//! Cache versions and the process-wide version clock.
//!
//! A `CacheVersion` identifies one lock attempt or one committed value.
//! The same type stamps lock versions on the near tier and value versions
//! on the primary tier; ordering is total (order first, uuid tie-break).

use crate::{CacheValue, Key};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use uuid::Uuid;

/// Globally unique, totally ordered cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheVersion {
    /// Monotone order component.
    pub order: u64,
    /// Uniqueness component.
    pub id: Uuid,
}

impl CacheVersion {
    /// Create a version with the given order and a fresh uuid.
    pub fn new(order: u64) -> Self {
        Self {
            order,
            id: Uuid::new_v4(),
        }
    }
}

impl PartialOrd for CacheVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .cmp(&other.order)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}:{}", self.order, self.id)
    }
}

/// Versioned value tuple observed on an entry: the value version plus the
/// typed and marshalled forms of the value at that version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// Version stamped by the primary.
    pub ver: CacheVersion,
    /// Typed value, when present.
    pub val: Option<CacheValue>,
    /// Marshalled value bytes, when present.
    pub bytes: Option<Vec<u8>>,
}

impl VersionedValue {
    /// Create a versioned value tuple.
    pub fn new(ver: CacheVersion, val: Option<CacheValue>, bytes: Option<Vec<u8>>) -> Self {
        Self { ver, val, bytes }
    }
}

/// Snapshot of a key's versioned state on the primary tier.
#[derive(Debug, Clone)]
pub struct DhtEntrySnapshot {
    /// Entry key.
    pub key: Key,
    /// Versioned value at snapshot time.
    pub versioned: VersionedValue,
}

/// Process-wide allocator of cache version orders.
///
/// One clock per node. Orders start at 1 and never repeat within a
/// process; the uuid component keeps versions unique across nodes even
/// when orders collide.
#[derive(Debug)]
pub struct VersionClock {
    order: AtomicU64,
}

impl VersionClock {
    /// Create a clock starting at order 1.
    pub fn new() -> Self {
        Self {
            order: AtomicU64::new(1),
        }
    }

    /// Allocate the next version.
    pub fn next(&self) -> CacheVersion {
        CacheVersion::new(self.order.fetch_add(1, AtomicOrdering::SeqCst))
    }

    /// Last allocated order (0 when none allocated yet).
    pub fn last_order(&self) -> u64 {
        self.order.load(AtomicOrdering::SeqCst).saturating_sub(1)
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        let a = CacheVersion::new(1);
        let b = CacheVersion::new(2);
        assert!(a < b);
        assert_ne!(CacheVersion::new(3), CacheVersion::new(3));
    }

    #[test]
    fn test_clock_monotone() {
        let clock = VersionClock::new();
        let a = clock.next();
        let b = clock.next();
        assert!(a.order < b.order);
        assert_eq!(clock.last_order(), b.order);
    }
}
