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

//! # PlexCache Core Types
//!
//! ## Purpose
//! Shared vocabulary for every PlexCache tier: node identity, totally
//! ordered cache versions, the cluster topology service, the affinity
//! function mapping keys to primary nodes, and the wall-clock timeout
//! processor.
//!
//! ## Architecture Context
//! This crate sits below every other PlexCache crate. It holds no cache
//! data itself; the near tier (`plexcache_nearcache`) and the primary tier
//! (`plexcache_dht`) build on the types defined here.

pub mod affinity;
pub mod config;
pub mod error;
pub mod node;
pub mod timeout;
pub mod topology;
pub mod version;

pub use affinity::{primary, AffinityFunction, RendezvousAffinity};
pub use config::CacheConfig;
pub use error::{CoreError, CoreResult};
pub use node::{NodeId, NodeRef};
pub use timeout::{TimeoutObject, TimeoutProcessor};
pub use topology::{TopologyListener, TopologyReadGuard, TopologyService};
pub use version::{CacheVersion, DhtEntrySnapshot, VersionClock, VersionedValue};

/// Cache key type.
pub type Key = String;

/// Cache value type. Values travel between tiers in both typed and
/// marshalled form; the marshalled form is the serialized JSON bytes.
pub type CacheValue = serde_json::Value;
