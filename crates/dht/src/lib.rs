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

//! # PlexCache DHT Tier
//!
//! ## Purpose
//! The authoritative primary tier. Each node owns the primary replica of
//! the keys its affinity assigns to it, grants locks on them, and stamps
//! values with authoritative versions that the near tier reconciles.
//!
//! ## Architecture Context
//! The lock coordinator reaches this tier two ways: directly through
//! [`DhtTier::lock_all_async`] for keys whose primary is the local node,
//! and through the transport for remote primaries.

pub mod error;
pub mod local;
pub mod tier;

pub use error::{DhtError, DhtResult};
pub use local::LocalDhtTier;
pub use tier::DhtTier;
