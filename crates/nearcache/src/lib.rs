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

//! # PlexCache Near-Cache Tier
//!
//! ## Purpose
//! Client-side entries backed by the DHT primary tier. Each entry carries
//! the last value reconciled from its primary and an ordered MVCC queue of
//! lock candidates; the candidate in the owner position holds the entry's
//! lock.
//!
//! ## Architecture Context
//! The lock coordinator in `plexcache_locks` enlists entries here, applies
//! primary responses onto them, and observes lock ownership changes
//! through the [`OwnerChangeListener`] seam.

pub mod entry;
pub mod error;
pub mod events;
pub mod mvcc;
pub mod store;

pub use entry::{
    EntryFilter, EntrySnapshot, NearEntry, NoopOwnerListener, OwnerChangeListener,
};
pub use error::{EntryError, EntryResult};
pub use events::{CacheEvent, EventSink, NoopEventSink, RecordingEventSink};
pub use mvcc::{LockCandidate, MvccList};
pub use store::NearCacheStore;
